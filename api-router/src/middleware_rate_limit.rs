use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::error::AppError;

use crate::{api_state::ApiState, error::ApiError};

const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window request counter. A zero limit disables limiting.
pub struct RateLimiter {
    limit_per_window: u32,
    window: Mutex<(Instant, u32)>,
}

impl RateLimiter {
    pub fn new(limit_per_window: u32) -> Self {
        Self {
            limit_per_window,
            window: Mutex::new((Instant::now(), 0)),
        }
    }

    /// Take one token; `false` means the caller is over the limit.
    pub fn try_acquire(&self) -> bool {
        if self.limit_per_window == 0 {
            return true;
        }

        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let (started, count) = &mut *window;
        if started.elapsed() >= WINDOW {
            *started = Instant::now();
            *count = 0;
        }
        if *count >= self.limit_per_window {
            return false;
        }
        *count += 1;
        true
    }
}

pub async fn rate_limit(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.limiter.try_acquire() {
        return Err(ApiError::App(AppError::RateLimited));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_exhausts_and_refuses() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn zero_limit_disables_limiting() {
        let limiter = RateLimiter::new(0);
        for _ in 0..100 {
            assert!(limiter.try_acquire());
        }
    }
}
