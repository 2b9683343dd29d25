//! Error types for the svgd-archive crate.

use thiserror::Error;

/// Errors raised by archive backends and the series fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// The archive file does not exist.
    #[error("archive not found: {path}")]
    NotFound {
        /// The archive path.
        path: String,
    },

    /// Connecting to a backend failed.
    #[error("cannot connect to {addr}: {reason}")]
    Connect {
        /// The backend address.
        addr: String,
        /// The underlying error.
        reason: String,
    },

    /// An I/O error on an established backend session.
    #[error("i/o error during {operation}: {reason}")]
    Io {
        /// What was being done.
        operation: String,
        /// The underlying error.
        reason: String,
    },

    /// The backend answered something that is not valid protocol.
    #[error("protocol error: {reason}")]
    Protocol {
        /// What was wrong with the answer.
        reason: String,
    },

    /// The cache daemon returned an error status.
    #[error("cache daemon error {code}: {message}")]
    Daemon {
        /// The negative status code.
        code: i64,
        /// The daemon's message.
        message: String,
    },

    /// The archive tool exited with a failure.
    #[error("{program} failed ({status}): {stderr}")]
    Command {
        /// The program that was run.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Backend output could not be parsed.
    #[error("parse error: {reason}")]
    Parse {
        /// What could not be parsed.
        reason: String,
    },

    /// A backend address is malformed.
    #[error("invalid backend address '{addr}': {reason}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No backend could serve the request.
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// The last failure.
        reason: String,
    },
}

impl ArchiveError {
    /// Returns true for transport failures that may succeed on another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io { .. } | Self::Protocol { .. } | Self::Command { .. }
        )
    }

    /// Returns true if the failure means the archive has no data to give.
    #[must_use]
    pub const fn is_missing_data(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn io(operation: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
