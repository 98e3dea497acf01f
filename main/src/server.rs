use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use axum::Router;
use backend_registry::{backends::mock::MockConfig, BackendKind, ModelDescriptor, ModelRegistry};
use common::{
    language::{default_mapping_for, LanguageRegistry},
    storage::kv::{KvStore, SurrealKvClient},
    telemetry::{Telemetry, TracingTelemetry},
    utils::config::{get_config, AppConfig},
    utils::embedding::{Embedder, OpenAiEmbedder},
};
use tower_http::compression::CompressionLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use translation_cache::{CacheConfig, TranslationCache};
use translation_pipeline::{EngineSettings, TranslationEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    // L2 cache store
    let kv: Arc<dyn KvStore> = if config.kv_url.starts_with("mem") {
        Arc::new(SurrealKvClient::memory(&config.kv_namespace, &config.kv_database).await?)
    } else {
        Arc::new(
            SurrealKvClient::new(
                &config.kv_url,
                &config.kv_username,
                &config.kv_password,
                &config.kv_namespace,
                &config.kv_database,
            )
            .await?,
        )
    };
    let cache = Arc::new(TranslationCache::new(
        kv,
        CacheConfig {
            base_ttl_ms: config.default_ttl_ms,
            l1_capacity: config.l1_cache_capacity,
            ..CacheConfig::default()
        },
    ));

    // Backends: register descriptors, load the configured set up front
    let registry = Arc::new(ModelRegistry::new());
    let mut languages = LanguageRegistry::new();
    for name in config.loaded_backend_names() {
        registry.register(descriptor_for(&name, &config))?;
        languages.register_backend(&name, default_mapping_for(&name));
        registry.load(&name).await?;
        info!(backend = name, "backend loaded");
    }

    let embedder: Option<Arc<dyn Embedder>> = if config.embedder_enabled {
        Some(Arc::new(OpenAiEmbedder::new(
            &config.openai_api_key,
            &config.openai_base_url,
        )))
    } else {
        None
    };

    let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);
    let engine = Arc::new(TranslationEngine::new(
        registry,
        Arc::new(languages),
        cache,
        embedder,
        telemetry,
        EngineSettings::from_config(&config),
    ));

    // Create Axum router
    let api_state = ApiState::new(engine, config.clone());
    let app = Router::new()
        .merge(api_routes(&api_state))
        .layer(CompressionLayer::new())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.http_port);
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Map a configured backend name to its descriptor. Names containing `nllb`
/// get the HTTP seq2seq client, `llm`/`gpt` the chat-completions client,
/// everything else the in-process mock.
fn descriptor_for(name: &str, config: &AppConfig) -> ModelDescriptor {
    let kind = if name.contains("nllb") {
        BackendKind::NllbLike {
            url: config.nllb_url.clone(),
        }
    } else if name.contains("llm") || name.contains("gpt") {
        BackendKind::LlmInstructTuned {
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.llm_model.clone(),
        }
    } else {
        BackendKind::Mock(MockConfig::default())
    };
    ModelDescriptor {
        name: name.to_string(),
        kind,
    }
}
