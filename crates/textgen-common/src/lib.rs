//! Shared error type, generation state and server configuration.

pub mod state;

pub use state::{GenerationConfig, GenerationState};

pub type Result<T> = core::result::Result<T, GenError>;

#[derive(thiserror::Error, Debug)]
pub enum GenError {
    #[error("no model is loaded")]
    NoModelLoaded,
    #[error("no tokenizer is loaded")]
    NoTokenizer,
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    #[error("invalid value for `{key}`: {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("backend generation failed: {0}")]
    Backend(String),
    #[error("config: {0}")]
    Config(String),
}

impl GenError {
    /// Caller contract violations, surfaced instead of logged-and-swallowed.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, GenError::InvalidSeed(_) | GenError::InvalidOption { .. })
    }
}

/// Backend family of a loaded model, fixed when the model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The framework generates full token sequences, optionally reporting each new token.
    #[default]
    Batch,
    /// The backend produces reply text on its own.
    Custom,
}

impl std::str::FromStr for BackendKind {
    type Err = GenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(BackendKind::Batch),
            "custom" => Ok(BackendKind::Custom),
            other => Err(GenError::Config(format!("unknown backend kind `{other}`"))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Batch => f.write_str("batch"),
            BackendKind::Custom => f.write_str("custom"),
        }
    }
}

pub mod config {
    use serde::Deserialize;
    use std::env;
    use std::path::Path;

    use crate::{BackendKind, GenError, GenerationState, Result};

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct ServerConfig {
        pub bind_addr: String,
        pub backend: BackendKind,
        pub model_name: String,
        pub mock_reply: String,
        pub token_delay_ms: u64,
        /// Generation options applied under every request's own state.
        pub defaults: GenerationState,
    }

    impl Default for ServerConfig {
        fn default() -> Self {
            Self {
                bind_addr: "0.0.0.0:8080".into(),
                backend: BackendKind::Batch,
                model_name: "mock".into(),
                mock_reply: "Hello! How can I help you today?".into(),
                token_delay_ms: 0,
                defaults: GenerationState::default(),
            }
        }
    }

    impl ServerConfig {
        /// Reads `TEXTGEN_CONFIG` when set, otherwise defaults plus `TEXTGEN_*` overrides.
        pub fn load() -> Result<Self> {
            if let Ok(path) = env::var("TEXTGEN_CONFIG") {
                return Self::from_file(path);
            }
            let mut cfg = Self::default();
            if let Ok(addr) = env::var("TEXTGEN_BIND_ADDR") { cfg.bind_addr = addr; }
            if let Ok(kind) = env::var("TEXTGEN_BACKEND") { cfg.backend = kind.parse()?; }
            if let Ok(name) = env::var("TEXTGEN_MODEL_NAME") { cfg.model_name = name; }
            if let Ok(reply) = env::var("TEXTGEN_MOCK_REPLY") { cfg.mock_reply = reply; }
            if let Some(v) = parse_env::<u64>("TEXTGEN_TOKEN_DELAY_MS")? { cfg.token_delay_ms = v; }
            if let Some(v) = parse_env::<bool>("TEXTGEN_STREAM")? { cfg.defaults.set("stream", v); }
            if let Some(v) = parse_env::<i64>("TEXTGEN_SEED")? { cfg.defaults.set("seed", v); }
            if let Some(v) = parse_env::<f64>("TEXTGEN_MAX_TOKENS_SECOND")? { cfg.defaults.set("max_tokens_second", v); }
            Ok(cfg)
        }

        pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)
                .map_err(|e| GenError::Config(format!("reading {}: {e}", path.display())))?;
            Self::from_yaml_str(&text)
        }

        pub fn from_yaml_str(text: &str) -> Result<Self> {
            serde_yaml::from_str(text).map_err(|e| GenError::Config(e.to_string()))
        }
    }

    fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
        match env::var(key) {
            Ok(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| GenError::Config(format!("{key}: cannot parse `{v}`"))),
            Err(_) => Ok(None),
        }
    }
}
