use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScenecraftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("No config file found (set SCENECRAFT_CONFIG or pass a path)")]
    NotFound,
}

/// Failures of the two network stages (prompt generation, image generation).
///
/// `Timeout`, `Network` and `InvalidResponse` are handled exactly like
/// `Upstream` by the orchestrator; `Auth` never reaches the network.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Missing API key for {provider}")]
    Auth { provider: &'static str },

    #[error("{provider} request failed: {message}")]
    Upstream {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} did not finish after {attempts} poll attempts")]
    Timeout {
        provider: &'static str,
        attempts: u32,
    },

    #[error("{provider} transport error: {source}")]
    Network {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unknown image model: {0}")]
    UnknownModel(String),

    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
}

impl GenerationError {
    pub fn upstream(provider: &'static str, message: impl Into<String>) -> Self {
        GenerationError::Upstream {
            provider,
            message: message.into(),
        }
    }

    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        GenerationError::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used in trace exception summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Auth { .. } => "AuthError",
            GenerationError::Upstream { .. } => "UpstreamError",
            GenerationError::Timeout { .. } => "TimeoutError",
            GenerationError::Network { .. } => "NetworkError",
            GenerationError::UnknownModel(_) => "UnknownModelError",
            GenerationError::InvalidResponse { .. } => "UpstreamError",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GenerationError::Auth { .. })
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored state in '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures on the trace path. Always logged and discarded by the caller.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Trace transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Trace backend rejected {operation}: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("Trace task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ScenecraftError>;
