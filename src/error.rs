use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptcastError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Audio processing failed: {0}")]
    Audio(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScriptcastError {
    /// Whether retrying the failed operation has a chance of succeeding.
    ///
    /// Transient: network trouble, rate limits, 5xx responses, provider
    /// hiccups, store connectivity. Everything else (bad input, missing
    /// records, configuration) is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            ScriptcastError::Http(e) => e.is_timeout() || e.is_connect(),
            ScriptcastError::Api { status, .. } => *status == 429 || *status >= 500,
            ScriptcastError::Provider(_) => true,
            ScriptcastError::Store(e) => {
                matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptcastError>;
