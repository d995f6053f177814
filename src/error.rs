use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum WardenError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Exchange errors (already classified)
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Stream degraded for {instrument} after {attempts} reconnect attempts")]
    StreamDegraded { instrument: String, attempts: u32 },

    // State machine errors
    #[error("Invalid state transition for {instrument}: from {from} to {to}")]
    InvalidStateTransition {
        instrument: String,
        from: String,
        to: String,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Collaborator errors (signal / forecast)
    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WardenError
pub type Result<T> = std::result::Result<T, WardenError>;

/// Classified failures from the trading API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timestamp outside recv window: {0}")]
    ClockSkew(String),

    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("unexpected payload: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_) | ExchangeError::Timeout { .. } | ExchangeError::RateLimited(_)
        )
    }

    /// Errors that need a server-time resync before retrying.
    pub fn is_clock_skew(&self) -> bool {
        matches!(self, ExchangeError::ClockSkew(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout { elapsed_ms: 0 }
        } else if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}
