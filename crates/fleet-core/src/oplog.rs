//! Per-call operation logging for bucket operations.
//!
//! Every public bucket call opens an [`OpLog`]: a `tracing` span carrying the
//! bucket, prefix, unprefixed object name, fully qualified URL, operation kind
//! and a short random correlation id. The start of the call is recorded at
//! TRACE, the finish at DEBUG with duration and terminal status.

use std::time::Instant;

use tracing::Span;

use crate::error::{Error, Result};

/// Kind of object operation, used in log fields and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Existence check.
    Exists,
    /// Full read.
    Read,
    /// Buffered or streamed write.
    Write,
    /// Delete.
    Delete,
    /// Attribute read.
    Attrs,
    /// Attribute patch.
    Update,
    /// Local file to object.
    Upload,
    /// Object to local file.
    Download,
    /// Prefix listing.
    List,
    /// Lock acquisition.
    Lock,
    /// Lock release.
    Unlock,
}

impl Op {
    /// Returns the lowercase name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Attrs => "attrs",
            Self::Update => "update",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::List => "list",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

/// Generates a short random correlation id (8 hex chars).
#[must_use]
pub fn call_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Structured timing and status for a single object call.
#[derive(Debug)]
pub struct OpLog {
    op: Op,
    url: String,
    span: Span,
    started: Option<Instant>,
}

impl OpLog {
    /// Opens a log context for `op` on the object at `url`.
    #[must_use]
    pub fn new(op: Op, bucket: &str, prefix: &str, object: &str, url: String) -> Self {
        let span = tracing::debug_span!(
            "object_op",
            bucket = bucket,
            prefix = prefix,
            object = object,
            url = %url,
            op = op.as_str(),
            call_id = %call_id(),
        );
        Self {
            op,
            url,
            span,
            started: None,
        }
    }

    /// The operation kind.
    #[must_use]
    pub fn op(&self) -> Op {
        self.op
    }

    /// The fully qualified object URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The span to instrument the call with.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Returns true once [`start`](Self::start) has run.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Starts the timer and records the start event.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
            tracing::trace!(parent: &self.span, "{} started", self.op.as_str());
        }
    }

    /// Records the finish event and wraps any error with op and URL.
    ///
    /// # Errors
    ///
    /// Returns the input error wrapped in `Error::Operation`.
    pub fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        let duration_ms = self
            .started
            .take()
            .map_or(0, |s| u64::try_from(s.elapsed().as_millis()).unwrap_or(u64::MAX));

        match result {
            Ok(value) => {
                tracing::debug!(
                    parent: &self.span,
                    duration_ms,
                    status = "ok",
                    "{} finished",
                    self.op.as_str()
                );
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(
                    parent: &self.span,
                    duration_ms,
                    status = "error",
                    error = %err,
                    "{} finished",
                    self.op.as_str()
                );
                Err(self.wrap(err))
            }
        }
    }

    /// Wraps an error with this call's op and URL.
    #[must_use]
    pub fn wrap(&self, err: Error) -> Error {
        err.in_operation(self.op.as_str(), self.url.clone())
    }
}
