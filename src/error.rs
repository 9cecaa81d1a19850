//! Error types for the caching client.

use std::io;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the caching client.
///
/// Network-level faults never surface through this type on the ordinary
/// set/get/clear paths; they degrade to per-key [`OpOutcome`] values at the
/// operation pipeline boundary. `Error` is reserved for construction-time
/// validation, topology resolution faults, and the one read-path condition
/// that indicates a backend/client mismatch ([`Error::Decode`]).
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration. Fatal at construction, never recoverable.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid cache entry (e.g. an expiry that is not in the future).
    #[error("invalid cache entry: {0}")]
    InvalidEntry(String),

    /// Topology resolution errors.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Network connection errors.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A bulk-get response could not be decoded back to a plain key.
    ///
    /// This indicates the backend returned data this client did not write
    /// (wrong separator, wrong codec, or a foreign writer on the same
    /// cluster), so it propagates instead of degrading to a miss.
    #[error("key decode error: {0}")]
    Decode(String),
}

/// Topology source errors.
#[derive(Error, Debug)]
pub enum TopologyError {
    /// The service discovery collaborator failed.
    #[error("service discovery failed: {0}")]
    Discovery(String),
}

/// Network connection errors.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Connection attempt failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// Connection was closed by the peer.
    #[error("connection closed")]
    Closed,

    /// The server sent a response this client could not parse.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Per-key outcome of a write or delete operation.
///
/// Degraded conditions (timeout, cancellation, full queue) are values, not
/// errors: a batch always processes every key and reports what happened to
/// each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// The backend confirmed the operation.
    Stored,
    /// The operation was dispatched asynchronously; completion is unconfirmed.
    Enqueued,
    /// The backend refused the operation (e.g. `add` on an existing key,
    /// `delete` on a missing key).
    NotStored,
    /// The payload exceeded the configured maximum size and was never sent.
    Oversized,
    /// The operation did not complete within the configured timeout.
    TimedOut,
    /// The operation was cancelled in flight (connection lost or client
    /// swapped out).
    Cancelled,
    /// The local operation queue was full for longer than the enqueue
    /// timeout.
    QueueFull,
}

impl OpOutcome {
    /// Whether the operation was accepted (confirmed or handed off).
    pub fn is_accepted(&self) -> bool {
        matches!(self, OpOutcome::Stored | OpOutcome::Enqueued)
    }

    /// Whether the operation degraded without confirmation.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            OpOutcome::TimedOut | OpOutcome::Cancelled | OpOutcome::QueueFull
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert!(OpOutcome::Stored.is_accepted());
        assert!(OpOutcome::Enqueued.is_accepted());
        assert!(!OpOutcome::Oversized.is_accepted());

        assert!(OpOutcome::TimedOut.is_degraded());
        assert!(OpOutcome::QueueFull.is_degraded());
        assert!(!OpOutcome::Stored.is_degraded());
        assert!(!OpOutcome::NotStored.is_degraded());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Config("separator must not be empty".into());
        assert!(err.to_string().contains("config error"));

        let err: Error = ConnectionError::Closed.into();
        assert!(err.to_string().contains("connection closed"));
    }
}
