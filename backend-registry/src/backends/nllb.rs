use std::time::Duration;

use async_trait::async_trait;
use common::error::AppError;
use serde::{Deserialize, Serialize};

use crate::{
    input_too_long_error, BackendCapabilities, BackendHealth, TranslatedChunk, Translator,
};

const MAX_INPUT_CHARS: usize = 5_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct TranslateBody<'a> {
    text: &'a str,
    source: &'a str,
    target: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translation: String,
    confidence: Option<f32>,
}

#[derive(Debug, Serialize)]
struct DetectBody<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    language: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Client for a local NLLB-style inference server exposing `/translate`,
/// `/detect` and `/health` JSON endpoints.
pub struct NllbHttpTranslator {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

impl NllbHttpTranslator {
    pub fn new(name: &str, base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
        })
    }

    fn classify(err: reqwest::Error) -> AppError {
        if err.is_timeout() || err.is_connect() {
            return AppError::BackendTransient(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                return AppError::BackendTransient(err.to_string());
            }
            return AppError::BackendFatal(err.to_string());
        }
        AppError::BackendTransient(err.to_string())
    }
}

#[async_trait]
impl Translator for NllbHttpTranslator {
    async fn translate(
        &self,
        chunk_text: &str,
        src: &str,
        tgt: &str,
    ) -> Result<TranslatedChunk, AppError> {
        let chars = chunk_text.chars().count();
        if chars > MAX_INPUT_CHARS {
            return Err(input_too_long_error(chars, MAX_INPUT_CHARS));
        }

        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&TranslateBody {
                text: chunk_text,
                source: src,
                target: tgt,
            })
            .send()
            .await
            .map_err(Self::classify)?
            .error_for_status()
            .map_err(Self::classify)?;

        let body: TranslateResponse = response.json().await.map_err(Self::classify)?;
        Ok(TranslatedChunk {
            text: body.translation,
            confidence: body.confidence,
        })
    }

    async fn detect(&self, text: &str) -> Result<String, AppError> {
        // Detection only needs a prefix; keep the payload small.
        let sample: String = text.chars().take(500).collect();
        let response = self
            .client
            .post(format!("{}/detect", self.base_url))
            .json(&DetectBody { text: &sample })
            .send()
            .await
            .map_err(Self::classify)?
            .error_for_status()
            .map_err(Self::classify)?;

        let body: DetectResponse = response.json().await.map_err(Self::classify)?;
        Ok(body.language)
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            languages: common::language::default_mapping_for(&self.name)
                .into_keys()
                .collect(),
            max_input_chars: MAX_INPUT_CHARS,
            supports_confidence: true,
        }
    }

    async fn health(&self) -> BackendHealth {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthResponse>().await {
                Ok(body) if body.status == "ok" => BackendHealth::Ready,
                Ok(_) => BackendHealth::Degraded,
                Err(_) => BackendHealth::Degraded,
            },
            Ok(_) => BackendHealth::Degraded,
            Err(_) => BackendHealth::Down,
        }
    }
}
