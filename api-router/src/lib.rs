use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use middleware_api_auth::api_auth;
use middleware_rate_limit::rate_limit;
use routes::{
    health::{health, live, ready},
    languages::{list_backend_languages, list_languages},
    models::{list_models, load_model, unload_model},
    translate::{translate, translate_adaptive, translate_progressive},
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod middleware_rate_limit;
mod routes;

/// Router for the translation gateway API
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route("/translate", post(translate))
        .route("/translate/adaptive", post(translate_adaptive))
        .route(
            "/translate/adaptive/progressive",
            post(translate_progressive),
        )
        .route("/models", get(list_models))
        .route("/models/{name}/load", post(load_model))
        .route("/models/{name}", delete(unload_model))
        .route("/languages", get(list_languages))
        .route("/languages/{backend}", get(list_backend_languages))
        .route_layer(from_fn_with_state(app_state.clone(), rate_limit))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use backend_registry::{
        backends::mock::MockConfig, BackendKind, ModelDescriptor, ModelRegistry,
    };
    use common::language::{default_mapping_for, LanguageRegistry};
    use common::storage::kv::SurrealKvClient;
    use common::telemetry::{Telemetry, TracingTelemetry};
    use common::utils::config::AppConfig;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;
    use translation_cache::{CacheConfig, TranslationCache};
    use translation_pipeline::{EngineSettings, TranslationEngine};
    use uuid::Uuid;

    async fn test_state() -> ApiState {
        let registry = Arc::new(ModelRegistry::new());
        registry
            .register(ModelDescriptor {
                name: "mock".to_string(),
                kind: BackendKind::Mock(MockConfig::default()),
            })
            .expect("register");
        registry.load("mock").await.expect("load");

        let mut languages = LanguageRegistry::new();
        languages.register_backend("mock", default_mapping_for("mock"));

        let kv = SurrealKvClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        let cache = Arc::new(TranslationCache::new(Arc::new(kv), CacheConfig::default()));

        let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);
        let engine = Arc::new(TranslationEngine::new(
            registry,
            Arc::new(languages),
            cache,
            None,
            telemetry,
            EngineSettings::default(),
        ));

        ApiState::new(engine, AppConfig::default())
    }

    fn app(state: &ApiState) -> Router {
        api_routes(state).with_state(state.clone())
    }

    fn authed_json_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("X-API-Key", "test-key")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn unauthenticated_translate_is_rejected() {
        let state = test_state().await;
        let request = Request::builder()
            .method("POST")
            .uri("/translate")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"text":"Hello world","target_lang":"ru"}"#,
            ))
            .expect("request");

        let response = app(&state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn translate_happy_path() {
        let state = test_state().await;
        let request = authed_json_request(
            "/translate",
            r#"{"text":"Hello world","source_lang":"en","target_lang":"ru"}"#,
        );

        let response = app(&state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(parsed["translated_text"], "Hello world");
        assert_eq!(parsed["detected_source"], "en");
        assert_eq!(parsed["cache_hit"], false);
    }

    #[tokio::test]
    async fn empty_text_is_unprocessable() {
        let state = test_state().await;
        let request =
            authed_json_request("/translate", r#"{"text":"","target_lang":"ru"}"#);

        let response = app(&state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(parsed["kind"], "invalid_request");
        assert_eq!(parsed["retryable"], false);
    }

    #[tokio::test]
    async fn unsupported_pair_is_unprocessable() {
        let state = test_state().await;
        let request = authed_json_request(
            "/translate",
            r#"{"text":"Hello world","source_lang":"en","target_lang":"xx"}"#,
        );

        let response = app(&state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(parsed["kind"], "unsupported_language_pair");
    }

    #[tokio::test]
    async fn rate_limit_returns_429() {
        let mut config = AppConfig::default();
        config.rate_limit_rpm = 1;
        let base = test_state().await;
        let state = ApiState::new(Arc::clone(&base.engine), config);

        let router = app(&state);
        let first = router
            .clone()
            .oneshot(authed_json_request(
                "/translate",
                r#"{"text":"Hello world","source_lang":"en","target_lang":"ru"}"#,
            ))
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::OK);

        let second = router
            .oneshot(authed_json_request(
                "/translate",
                r#"{"text":"Hello again","source_lang":"en","target_lang":"ru"}"#,
            ))
            .await
            .expect("response");
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn models_list_and_languages() {
        let state = test_state().await;

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/models")
                    .header("X-API-Key", "test-key")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.expect("body").to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(parsed["models"][0]["name"], "mock");
        assert_eq!(parsed["models"][0]["state"], "ready");

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/languages/mock")
                    .header("X-API-Key", "test-key")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/languages/ghost")
                    .header("X-API-Key", "test-key")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_loaded_models() {
        let state = test_state().await;
        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["loaded_models"][0], "mock");
    }

    #[tokio::test]
    async fn progressive_endpoint_streams_json_lines() {
        let state = test_state().await;
        let request = authed_json_request(
            "/translate/adaptive/progressive",
            r#"{"text":"Hello world. This is a longer text for streaming purposes, long enough to chunk.","source_lang":"en","target_lang":"ru"}"#,
        );

        let response = app(&state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert!(lines.len() >= 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(first["event"], "start");
        let last: serde_json::Value =
            serde_json::from_str(lines[lines.len() - 1]).expect("json line");
        assert_eq!(last["event"], "final");
    }
}
