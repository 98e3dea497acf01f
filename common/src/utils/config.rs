use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub api_key: String,
    #[serde(default = "default_backend")]
    pub default_backend: String,
    /// Comma-separated backend names loaded at startup.
    #[serde(default = "default_loaded_backends")]
    pub loaded_backends: String,
    #[serde(default = "default_kv_url")]
    pub kv_url: String,
    #[serde(default = "default_kv_username")]
    pub kv_username: String,
    #[serde(default = "default_kv_password")]
    pub kv_password: String,
    #[serde(default = "default_kv_namespace")]
    pub kv_namespace: String,
    #[serde(default = "default_kv_database")]
    pub kv_database: String,
    #[serde(default)]
    pub embedder_enabled: bool,
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_fast_path_threshold")]
    pub fast_path_threshold: usize,
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f32,
    #[serde(default = "default_max_chunk_concurrency")]
    pub max_chunk_concurrency: usize,
    #[serde(default = "default_max_probe_concurrency")]
    pub max_probe_concurrency: usize,
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    #[serde(default = "default_l1_cache_capacity")]
    pub l1_cache_capacity: usize,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_nllb_url")]
    pub nllb_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
}

fn default_backend() -> String {
    "mock".to_string()
}

fn default_loaded_backends() -> String {
    "mock".to_string()
}

fn default_kv_url() -> String {
    "mem://".to_string()
}

fn default_kv_username() -> String {
    "root".to_string()
}

fn default_kv_password() -> String {
    "root".to_string()
}

fn default_kv_namespace() -> String {
    "translation".to_string()
}

fn default_kv_database() -> String {
    "cache".to_string()
}

fn default_rate_limit_rpm() -> u32 {
    60
}

fn default_max_text_chars() -> usize {
    10_000
}

fn default_fast_path_threshold() -> usize {
    100
}

fn default_chunk_size() -> usize {
    400
}

fn default_quality_threshold() -> f32 {
    0.8
}

fn default_max_chunk_concurrency() -> usize {
    5
}

fn default_max_probe_concurrency() -> usize {
    3
}

fn default_ttl_ms() -> u64 {
    3_600_000
}

fn default_l1_cache_capacity() -> usize {
    1_024
}

fn default_http_port() -> u16 {
    8000
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_nllb_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

impl AppConfig {
    /// Backend names from the comma-separated `LOADED_BACKENDS` key.
    pub fn loaded_backend_names(&self) -> Vec<String> {
        self.loaded_backends
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: "test-key".to_string(),
            default_backend: default_backend(),
            loaded_backends: default_loaded_backends(),
            kv_url: default_kv_url(),
            kv_username: default_kv_username(),
            kv_password: default_kv_password(),
            kv_namespace: default_kv_namespace(),
            kv_database: default_kv_database(),
            embedder_enabled: false,
            rate_limit_rpm: default_rate_limit_rpm(),
            max_text_chars: default_max_text_chars(),
            fast_path_threshold: default_fast_path_threshold(),
            default_chunk_size: default_chunk_size(),
            quality_threshold: default_quality_threshold(),
            max_chunk_concurrency: default_max_chunk_concurrency(),
            max_probe_concurrency: default_max_probe_concurrency(),
            default_ttl_ms: default_ttl_ms(),
            l1_cache_capacity: default_l1_cache_capacity(),
            http_port: default_http_port(),
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            nllb_url: default_nllb_url(),
            llm_model: default_llm_model(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
