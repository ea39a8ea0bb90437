use thiserror::Error;

/// Result type for lighting operations
pub type Result<T> = std::result::Result<T, LightingError>;

/// Errors that can occur while talking to the Ring cloud and bridges
#[derive(Error, Debug)]
pub enum LightingError {
    /// Token exchange failed or returned no access token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Location or ticket lookup failed
    #[error("Topology lookup failed: {0}")]
    Topology(String),

    /// No location on the account has a lighting bridge
    #[error("No smart lighting bridges found in any location")]
    NoBridges,

    /// A bridge channel could not be opened
    #[error("Channel {url} failed to open: {reason}")]
    Channel {
        /// Channel URL
        url: String,
        /// Why the open failed
        reason: String,
    },

    /// No matching response arrived before the deadline
    #[error("Timeout - no response received within {timeout_ms} ms")]
    Timeout {
        /// Deadline that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// No discovered device matched the requested name(s)
    #[error("Light or group not found: {0}")]
    NotFound(String),

    /// Malformed or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Caller asked for a power state other than on or off
    #[error("Invalid power state '{0}', expected 'on' or 'off'")]
    InvalidState(String),

    /// A request with the same correlation key is still outstanding
    #[error("Request {0} is already awaiting a response")]
    AlreadyPending(String),

    /// Channel was closed before a response arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// The command queue worker is gone
    #[error("Command queue closed")]
    QueueClosed,

    /// The task runner panicked; the queue moved on to the next task
    #[error("Task panicked")]
    TaskPanicked,

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for LightingError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl LightingError {
    pub(crate) fn channel(url: &str, reason: impl Into<String>) -> Self {
        Self::Channel {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a correlation deadline expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
