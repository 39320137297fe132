//! Error types for the set-top-box control protocol.

use thiserror::Error;

/// Result type alias for STB operations.
pub type Result<T> = std::result::Result<T, StbError>;

/// STB protocol error types.
#[derive(Debug, Error)]
pub enum StbError {
    /// Socket, timeout or handshake failure while connecting
    #[error("Could not connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Connection timeout
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// Not connected to the device
    #[error("Not connected")]
    NotConnected,

    /// Write failed or the writer is already faulted
    #[error("Send failed")]
    Send,

    /// No complete response frame before the timeout
    #[error("No response from device")]
    NoResponse,

    /// Corrupt or invalid compressed payload
    #[error("Decompress error: {0}")]
    Decompress(String),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A channel change is already in flight
    #[error("Zap already in flight")]
    ZapInFlight,

    /// Catalog sync aborted; channels from earlier pages are kept
    #[error("Channel load failed after {partial_count} channels: {reason}")]
    SyncFailed { reason: String, partial_count: usize },

    /// Cache collaborator failure
    #[error("Store error: {0}")]
    Store(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON snapshot error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The controller worker has stopped
    #[error("Channel closed")]
    ChannelClosed,
}

impl StbError {
    /// Create a connect error for the given address.
    pub fn connect(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create a decompress error.
    pub fn decompress(msg: impl Into<String>) -> Self {
        Self::Decompress(msg.into())
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::NotConnected | Self::ConnectionTimeout | Self::Send | Self::Io(_)
        )
    }

    /// Check if this error is retryable.
    ///
    /// A decompress failure is handled like a missing response.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout | Self::Send | Self::NoResponse | Self::Decompress(_)
        )
    }
}
