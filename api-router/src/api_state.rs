use std::sync::Arc;

use common::utils::config::AppConfig;
use translation_pipeline::TranslationEngine;

use crate::middleware_rate_limit::RateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<TranslationEngine>,
    pub config: AppConfig,
    pub limiter: Arc<RateLimiter>,
}

impl ApiState {
    pub fn new(engine: Arc<TranslationEngine>, config: AppConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_rpm));
        Self {
            engine,
            config,
            limiter,
        }
    }
}
