//! Error types for the finder
//!
//! Remote failures ([`Error::Connect`], [`Error::Protocol`]) trip the peer's
//! circuit breaker and are contained per peer during a fan-out round. A peer
//! that accepted the connection but answered too late ([`Error::Timeout`])
//! is only dropped from the round. Local
//! listing failures are contained per subtree by the walker and only surface
//! here when a caller reads a single archive directly.

use thiserror::Error;

/// Main error type for the finder
#[derive(Error, Debug)]
pub enum Error {
    /// Peer unreachable, or the connect deadline expired
    #[error("Connect error for {host}: {message}")]
    Connect {
        /// Peer host identity
        host: String,
        /// Underlying transport message
        message: String,
    },

    /// Peer answered with a non-success status or an undecodable body
    #[error("Protocol error for {host}: {message}")]
    Protocol {
        /// Peer host identity
        host: String,
        /// What was wrong with the response
        message: String,
    },

    /// Peer connected but the request deadline expired before the answer
    #[error("Timeout for {host}: {message}")]
    Timeout {
        /// Peer host identity
        host: String,
        /// Underlying transport message
        message: String,
    },

    /// Local IO error (directory listing, archive or sidecar access)
    #[error("Local IO error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// Configuration error, fatal at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opaque archive backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Operation not supported by this node variant
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Serialization error (sidecar context, wire records)
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a connect error for `host`
    pub fn connect(host: impl Into<String>, message: impl ToString) -> Self {
        Error::Connect {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Build a protocol error for `host`
    pub fn protocol(host: impl Into<String>, message: impl ToString) -> Self {
        Error::Protocol {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Build a request timeout error for `host`
    pub fn timeout(host: impl Into<String>, message: impl ToString) -> Self {
        Error::Timeout {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// True for errors that mark a peer failed
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::Protocol { .. })
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connect { .. } => "connect",
            Error::Protocol { .. } => "protocol",
            Error::Timeout { .. } => "timeout",
            Error::LocalIo(_) => "local_io",
            Error::Config(_) => "config",
            Error::Backend(_) => "backend",
            Error::Unsupported(_) => "unsupported",
            Error::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
