//! Write sinks and the fan-out writer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_core::{Error, Result, WriteSink};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Local file sink, opened for append and created if missing.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Opens `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error if the file cannot be opened.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| Error::io(format!("open {}", path.display()), e))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// The file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WriteSink for FileSink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or_else(|| {
            Error::InvariantViolation(format!("write after close: {}", self.path.display()))
        })?;
        file.write_all(buf)
            .await
            .map_err(|e| Error::io(format!("write {}", self.path.display()), e))?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        let mut file = self.file.take().ok_or_else(|| {
            Error::InvariantViolation(format!("already closed: {}", self.path.display()))
        })?;
        file.flush()
            .await
            .map_err(|e| Error::io(format!("flush {}", self.path.display()), e))
    }
}

/// Tee writer: every write goes to every sink, in order.
///
/// A write stops at the first failing sink, so earlier sinks may already hold
/// the bytes. `close` closes every sink and returns the first error.
#[derive(Default)]
pub struct MultiWriter {
    sinks: Vec<Box<dyn WriteSink>>,
    closed: bool,
}

impl std::fmt::Debug for MultiWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiWriter")
            .field("sinks", &self.sinks.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl MultiWriter {
    /// Creates a writer over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn WriteSink>>) -> Self {
        Self {
            sinks,
            closed: false,
        }
    }

    /// Adds a sink.
    pub fn push(&mut self, sink: Box<dyn WriteSink>) {
        self.sinks.push(sink);
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl WriteSink for MultiWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::InvariantViolation("write after close".into()));
        }
        for sink in &mut self.sinks {
            let n = sink.write(buf).await?;
            if n != buf.len() {
                return Err(Error::io(
                    "multi-writer",
                    std::io::Error::new(std::io::ErrorKind::WriteZero, "short write"),
                ));
            }
        }
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvariantViolation("writer already closed".into()));
        }
        self.closed = true;

        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "artifact sink failed to close");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
