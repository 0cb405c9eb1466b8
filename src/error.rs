//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report the failures an acquisition run can hit, from bad operator input to a
//! serial link that stops answering halfway through a matrix.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidParameter`**: sample count, channel selection, acquisition count or
//!   folder rejected before any I/O happens.
//! - **`UnsupportedFormat`**: an output format the log writer cannot produce
//!   (binary logs).
//! - **`PortUnavailable`**: the serial port is missing or already claimed.
//! - **`LinkError`** / **`Timeout`** / **`ShortRead`**: the link failed while a session
//!   was in flight.
//! - **`WriteError`**: the filesystem refused a log file.
//! - **`Config`**: configuration could not be loaded or extracted.
//! - **`WorkerFailed`**: the background worker running a blocking session died.
//! - **`Logging`**: the tracing subscriber could not be installed.
//!
//! [`DaqError::kind`] folds these into an [`ErrorKind`] so callers can tell
//! "fix your input" apart from "retry or abort".

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised anywhere in an acquisition run.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Operator input rejected before any I/O.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Output format the log writer cannot produce.
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// The port is missing or already claimed.
    #[error("Serial port '{port}' unavailable: {reason}")]
    PortUnavailable {
        /// Port name as given by the operator
        port: String,
        /// OS or driver message
        reason: String,
    },

    /// Write or read failed mid-session.
    #[error("Serial link error: {0}")]
    LinkError(String),

    /// The read deadline passed before all bytes arrived.
    #[error("Serial read timed out: expected {expected} bytes, received {received}")]
    Timeout {
        /// Bytes requested
        expected: usize,
        /// Bytes received before the deadline
        received: usize,
    },

    /// Fewer bytes than one sample were handed to the decoder.
    #[error("Short read: expected {expected} bytes, got {received}")]
    ShortRead {
        /// Bytes needed
        expected: usize,
        /// Bytes supplied
        received: usize,
    },

    /// The filesystem refused a log file.
    #[error("Failed to write log file '{}': {source}", path.display())]
    WriteError {
        /// File that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A blocking worker panicked or was cancelled.
    #[error("Acquisition worker failed: {0}")]
    WorkerFailed(String),

    /// The tracing subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Coarse classification of a [`DaqError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operator input or configuration must be fixed before retrying.
    Input,
    /// The serial link misbehaved; retrying the measurement may succeed.
    Link,
    /// The acquisition succeeded but its data could not be persisted.
    Storage,
    /// Bug or runtime failure inside the application.
    Internal,
}

impl DaqError {
    /// Classify this error for the caller.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::InvalidParameter(_)
            | DaqError::UnsupportedFormat(_)
            | DaqError::Config(_) => ErrorKind::Input,
            DaqError::PortUnavailable { .. }
            | DaqError::LinkError(_)
            | DaqError::Timeout { .. }
            | DaqError::ShortRead { .. } => ErrorKind::Link,
            DaqError::WriteError { .. } => ErrorKind::Storage,
            DaqError::WorkerFailed(_) | DaqError::Logging(_) => ErrorKind::Internal,
        }
    }

    /// Whether a later measurement on the same link can reasonably succeed.
    #[must_use]
    pub fn can_recover(&self) -> bool {
        matches!(self.kind(), ErrorKind::Link | ErrorKind::Storage)
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        DaqError::InvalidParameter(msg.into())
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl From<tokio::task::JoinError> for DaqError {
    fn from(value: tokio::task::JoinError) -> Self {
        DaqError::WorkerFailed(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_input_errors() {
        let err = DaqError::invalid("sample count 0 out of range");
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(!err.can_recover());
        assert_eq!(
            err.to_string(),
            "Invalid parameter: sample count 0 out of range"
        );
    }

    #[test]
    fn classifies_link_errors_as_recoverable() {
        let timeout = DaqError::Timeout {
            expected: 2,
            received: 1,
        };
        assert_eq!(timeout.kind(), ErrorKind::Link);
        assert!(timeout.can_recover());
        assert!(timeout.to_string().contains("expected 2 bytes"));

        let busy = DaqError::PortUnavailable {
            port: "/dev/ttyUSB0".into(),
            reason: "device busy".into(),
        };
        assert_eq!(busy.kind(), ErrorKind::Link);
        assert!(busy.to_string().contains("/dev/ttyUSB0"));
    }

    #[test]
    fn write_error_mentions_path() {
        let err = DaqError::WriteError {
            path: PathBuf::from("/data/m_0001.txt"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("m_0001.txt"));
    }
}
