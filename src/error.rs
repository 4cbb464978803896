//! Error types for the mailbot.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Tenant {0} not found")]
    TenantNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn missing(key: &str, hint: &str) -> Self {
        Self::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        }
    }

    pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Mail transport errors (IMAP, SMTP, credentials).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {host} failed: {reason}")]
    ConnectFailed { host: String, reason: String },

    #[error("Authentication failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("IMAP error: {0}")]
    Imap(#[from] async_imap::error::Error),

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    SendFailed(String),

    #[error("Access token unavailable: {0}")]
    Token(String),

    #[error("Blocking task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned an empty reply")]
    EmptyResponse { provider: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Missing API key for provider {0}")]
    MissingApiKey(String),
}

/// Dedup store and counter persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote store request failed: {0}")]
    Remote(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Tenant registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry request failed: {0}")]
    Request(String),

    #[error("Registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode registry response: {0}")]
    Decode(String),

    #[error("Failed to read tenant directory {path}: {reason}")]
    Directory { path: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Per-tenant worker failures, surfaced to the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker for tenant {tenant} failed: {reason}")]
    Failed { tenant: String, reason: String },

    #[error("Worker for tenant {tenant} panicked: {reason}")]
    Panicked { tenant: String, reason: String },

    #[error("Tenant {tenant} exceeded {max} worker restarts")]
    RestartLimit { tenant: String, max: u32 },
}

/// Result type alias for the mailbot.
pub type Result<T> = std::result::Result<T, Error>;
