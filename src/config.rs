use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::database::StorePreference;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is not set. Add it to the environment or to a .env file")]
    MissingApiKey,
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    pub api_url: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl GeminiConfig {
    /// Defaults for everything but the key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            embedding_model: "text-embedding-004".to_string(),
            api_url: DEFAULT_GEMINI_API_URL.to_string(),
            temperature: 0.2,
            top_p: 0.9,
            top_k: 32,
            max_output_tokens: 8192,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingBackend {
    #[default]
    Local,
    Gemini,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "hashing" => Ok(EmbeddingBackend::Local),
            "gemini" => Ok(EmbeddingBackend::Gemini),
            other => Err(format!("unknown embedding backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub preference: StorePreference,
    pub collection: String,
    pub embeddings: EmbeddingBackend,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    pub server: ServerConfig,
    pub store: StoreConfig,
}

fn parsed<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn text(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// `GEMINI_API_KEY`, or else any variable whose name mentions both GEMINI and KEY.
fn find_api_key(vars: &HashMap<String, String>) -> Option<String> {
    if let Some(key) = vars.get("GEMINI_API_KEY").filter(|v| !v.trim().is_empty()) {
        return Some(key.trim().to_string());
    }
    let mut candidates: Vec<(&String, &String)> = vars
        .iter()
        .filter(|(name, value)| {
            let upper = name.to_uppercase();
            upper.contains("GEMINI") && upper.contains("KEY") && !value.trim().is_empty()
        })
        .collect();
    candidates.sort();
    candidates.first().map(|(_, value)| value.trim().to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let api_key = find_api_key(vars).ok_or(ConfigError::MissingApiKey)?;

        let model = text(vars, "GEMINI_MODEL", DEFAULT_GEMINI_MODEL);
        let model = model.trim_start_matches("models/").to_string();

        let api_url = text(vars, "GEMINI_API_URL", DEFAULT_GEMINI_API_URL);
        url::Url::parse(&api_url).map_err(|e| ConfigError::Invalid {
            key: "GEMINI_API_URL".to_string(),
            message: e.to_string(),
        })?;

        let defaults = GeminiConfig::with_api_key(api_key.clone());
        let gemini = GeminiConfig {
            api_key,
            model,
            embedding_model: text(vars, "GEMINI_EMBEDDING_MODEL", &defaults.embedding_model)
                .trim_start_matches("models/")
                .to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            temperature: parsed(vars, "GEMINI_TEMPERATURE", defaults.temperature)?,
            top_p: parsed(vars, "GEMINI_TOP_P", defaults.top_p)?,
            top_k: parsed(vars, "GEMINI_TOP_K", defaults.top_k)?,
            max_output_tokens: parsed(vars, "GEMINI_MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
            timeout_secs: parsed(vars, "GEMINI_TIMEOUT_SECS", defaults.timeout_secs)?,
        };

        let max_upload_mb: usize = parsed(vars, "RCM_MAX_UPLOAD_MB", 25)?;
        let server = ServerConfig {
            host: text(vars, "RCM_HOST", "127.0.0.1"),
            port: parsed(vars, "RCM_PORT", 8501)?,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        };

        let store = StoreConfig {
            data_dir: PathBuf::from(text(vars, "RCM_DATA_DIR", "data")),
            preference: parsed(vars, "RCM_VECTOR_STORE", StorePreference::Auto)?,
            collection: text(vars, "RCM_COLLECTION", "risk_control_matrix"),
            embeddings: parsed(vars, "RCM_EMBEDDINGS", EmbeddingBackend::Local)?,
        };

        Ok(Self { gemini, server, store })
    }
}
