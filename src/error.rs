use std::time::Duration;
use thiserror::Error;

/// A single external data source failed. Always soft: the fetch chain logs it
/// and falls through to the next provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} timed out after {after:?}")]
    Timeout { provider: &'static str, after: Duration },

    #[error("{provider} returned HTTP {status}")]
    Status { provider: &'static str, status: u16 },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} response could not be parsed: {message}")]
    Parse { provider: &'static str, message: String },

    #[error("{provider} has no usable data for this token")]
    Empty { provider: &'static str },
}

impl ProviderError {
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderError::Timeout { provider, .. }
            | ProviderError::Status { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Parse { provider, .. }
            | ProviderError::Empty { provider } => provider,
        }
    }
}

/// Persistence failures from the snapshot store and history ledger
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store rejected write: {0}")]
    Rejected(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// How a failed request should be reported to whoever called the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
}

/// Errors surfaced by the aggregation engine's public operations.
/// Store failures are not among them; the engine logs and counts those.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid {field}: {reason}")]
    MalformedInput { field: &'static str, reason: String },

    #[error("Response could not be encoded: {0}")]
    Serialization(String),
}

impl EngineError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            EngineError::MalformedInput { .. } => ErrorClass::Client,
            EngineError::Serialization(_) => ErrorClass::Server,
        }
    }
}

/// Failures on the consuming side. These never cross `TokenDataClient`'s
/// public methods; they are logged and degraded to fallbacks or empty results.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned HTTP {0}")]
    Status(u16),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Lookup timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
