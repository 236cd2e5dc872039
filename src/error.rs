//! Error types for the expedition sync layer.

use thiserror::Error;

/// Errors that can occur inside the sync layer or its transports.
///
/// Very little of this crosses the [`SyncFacade`](crate::SyncFacade) boundary:
/// connection failures surface as [`ConnectionState::Error`](crate::ConnectionState::Error)
/// and notification sink failures are swallowed by the dispatcher.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a frame through the channel.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the channel.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The channel was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A haptic or popup sink failed to deliver its effect.
    #[error("notification sink error: {0}")]
    Sink(String),

    /// Configuration values that can never work (e.g. a zero-sized update log).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A specialized [`Result`] type for sync layer operations.
pub type Result<T> = std::result::Result<T, SyncError>;
