use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use common::error::AppError;

use crate::{
    input_too_long_error, BackendCapabilities, BackendHealth, TranslatedChunk, Translator,
};

const MAX_INPUT_CHARS: usize = 8_000;

const TRANSLATE_SYSTEM_PROMPT: &str = "You are a professional translator. Translate the user's \
text from the given source language to the given target language. Preserve formatting, named \
entities, numbers and punctuation. Reply with the translation only, no commentary.";

const DETECT_SYSTEM_PROMPT: &str = "Identify the language of the user's text. Reply with the \
two-letter ISO 639-1 code only, or 'unknown' if you cannot tell.";

/// Instruct-tuned LLM behind an OpenAI-compatible chat-completions API.
/// Reports no per-chunk confidence; the assessor falls back to neutral.
pub struct LlmTranslator {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

impl LlmTranslator {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: async_openai::Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn classify(err: OpenAIError) -> AppError {
        match err {
            OpenAIError::Reqwest(inner) => AppError::BackendTransient(inner.to_string()),
            OpenAIError::ApiError(api) => {
                let label = api.r#type.clone().unwrap_or_default();
                if label.contains("rate_limit") || label.contains("server_error") {
                    AppError::BackendTransient(api.message)
                } else {
                    AppError::BackendFatal(api.message)
                }
            }
            other => AppError::BackendFatal(other.to_string()),
        }
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system.to_string()).into(),
                ChatCompletionRequestUserMessage::from(user).into(),
            ])
            .build()
            .map_err(Self::classify)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(Self::classify)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::BackendFatal("no content in completion".to_string()))
    }
}

#[async_trait]
impl Translator for LlmTranslator {
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

        let user = format!("Source language: {src}\nTarget language: {tgt}\n\n{chunk_text}");
        let text = self.complete(TRANSLATE_SYSTEM_PROMPT, user).await?;

        Ok(TranslatedChunk {
            text: text.trim().to_string(),
            confidence: None,
        })
    }

    async fn detect(&self, text: &str) -> Result<String, AppError> {
        let sample: String = text.chars().take(500).collect();
        let raw = self.complete(DETECT_SYSTEM_PROMPT, sample).await?;
        let code = raw.trim().to_ascii_lowercase();

        if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(code)
        } else {
            Ok("unknown".to_string())
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            languages: common::language::default_mapping_for("llm")
                .into_keys()
                .collect(),
            max_input_chars: MAX_INPUT_CHARS,
            supports_confidence: false,
        }
    }

    async fn health(&self) -> BackendHealth {
        // No cheap health probe on chat-completions APIs; report Ready and let
        // per-call errors drive the circuit.
        BackendHealth::Ready
    }
}
