//! Error types and result aliases for fleet tooling.
//!
//! Every bucket operation reports failures through [`Error`]. Errors raised by
//! a remote call are wrapped in [`Error::Operation`] together with the
//! operation kind and the fully qualified object URL, while [`Error::kind`]
//! looks through that wrapper so callers can still match on the original
//! classification.

use std::fmt;
use std::time::Duration;

/// The result type used throughout fleet tooling.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`], independent of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced object does not exist.
    NotFound,
    /// Generation or existence precondition violated.
    PreconditionFailed,
    /// Lock acquisition exceeded its maximum wait.
    Timeout,
    /// The handle's cancellation token fired.
    Cancelled,
    /// The store call failed for a non-semantic reason (network, credentials).
    Transport,
    /// An attribute or option is inconsistent with the operation.
    InvalidArgument,
    /// A handle was used in a state that forbids the call.
    InvariantViolation,
    /// A local filesystem step failed.
    Io,
    /// In-process state is broken (poisoned mutex, failed task join).
    Internal,
}

impl ErrorKind {
    /// Returns a stable lowercase name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PreconditionFailed => "precondition_failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Transport => "transport",
            Self::InvalidArgument => "invalid_argument",
            Self::InvariantViolation => "invariant_violation",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in fleet storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The referenced object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A generation or existence precondition was not satisfied.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// Lock acquisition did not complete within its maximum wait.
    #[error("timed out after {waited:?} waiting for lock: {url}")]
    Timeout {
        /// The configured maximum wait.
        waited: Duration,
        /// URL of the lock object.
        url: String,
    },

    /// The operation was cancelled through the handle's cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The underlying store call failed (network, credentials, server error).
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An attribute, option, or name is not acceptable for the operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A handle was used in a state that forbids the call.
    #[error("{0}")]
    InvariantViolation(String),

    /// A local filesystem step failed.
    #[error("{context}: {source}")]
    Io {
        /// Which step failed, including the local path.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// A bucket operation failed; wraps the inner error with its context.
    #[error("{op} {url} failed: {source}")]
    Operation {
        /// Operation kind (`read`, `write`, `delete`, ...).
        op: &'static str,
        /// Fully qualified object URL (`gs://bucket/prefix+name`).
        url: String,
        /// The inner error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error with a source cause.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a precondition failure with the given message.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Creates a local I/O error for the given step.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps this error with the operation kind and object URL.
    ///
    /// Already wrapped errors are returned unchanged so a failure is never
    /// reported twice for the same call.
    #[must_use]
    pub fn in_operation(self, op: &'static str, url: impl Into<String>) -> Self {
        match self {
            Self::Operation { .. } => self,
            inner => Self::Operation {
                op,
                url: url.into(),
                source: Box::new(inner),
            },
        }
    }

    /// Returns the classification of this error, looking through wrappers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Self::Io { .. } => ErrorKind::Io,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Operation { source, .. } => source.kind(),
        }
    }

    /// Returns true if the object did not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true if a generation or existence precondition failed.
    #[must_use]
    pub fn is_precondition_failed(&self) -> bool {
        self.kind() == ErrorKind::PreconditionFailed
    }

    /// Returns true if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_wrapper_formats_op_and_url() {
        let err = Error::NotFound("x".into()).in_operation("delete", "gs://b/x");
        assert_eq!(err.to_string(), "delete gs://b/x failed: not found: x");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn wrapping_is_idempotent() {
        let err = Error::Cancelled
            .in_operation("read", "gs://b/a")
            .in_operation("write", "gs://b/other");
        assert_eq!(err.to_string(), "read gs://b/a failed: operation cancelled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn timeout_message_names_lock_url() {
        let err = Error::Timeout {
            waited: Duration::from_secs(1),
            url: "gs://b/test.lk".into(),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 1s waiting for lock: gs://b/test.lk"
        );
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn invariant_violation_displays_bare_message() {
        let err = Error::InvariantViolation("repo is not locked".into());
        assert_eq!(err.to_string(), "repo is not locked");
    }
}
