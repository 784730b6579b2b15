//! Error types for span reporting.

use thiserror::Error;

/// Errors raised by a [`TelemetrySender`](crate::sender::TelemetrySender).
///
/// Every variant is treated the same way by the pipeline: the point or span is
/// lost and the failure is logged. Nothing is retried.
#[derive(Debug, Error)]
pub enum SendError {
    /// I/O failure writing to the backend connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Transport-layer error (proxy unreachable, connection reset, ...).
    #[error("transport error: {0}")]
    Transport(String),
    /// The record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SendError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            SendError::Io(e.into())
        } else {
            SendError::Serialization(e.to_string())
        }
    }
}

/// Rejection from a non-blocking offer. The rejected item is handed back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OfferError<T> {
    /// The queue is at capacity.
    #[error("queue is full")]
    Full(T),
    /// The queue has been closed for new items.
    #[error("queue is closed")]
    Closed(T),
}

impl<T> OfferError<T> {
    /// Returns the item that could not be queued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }

    /// Returns `true` if a later offer may succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Errors returned by a blocking take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TakeError {
    /// The waiting consumer was woken by an interrupt before an item arrived.
    #[error("take interrupted")]
    Interrupted,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Lifecycle errors of the reporter's background work.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The export thread could not be spawned.
    #[error("failed to spawn export thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The heartbeat task panicked or was cancelled.
    #[error("heartbeat task failed: {0}")]
    Scheduler(#[from] tokio::task::JoinError),
}
