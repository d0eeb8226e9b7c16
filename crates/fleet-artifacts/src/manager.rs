//! Artifact manager: where artifacts go and how their writers are built.
//!
//! Every artifact lives under `<destination>/<release>/<kind>/<timestamp>`,
//! both in the local directory and in the bucket. The timestamp is taken once
//! when the manager is created, so one run's artifacts share a directory.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fleet_core::{Bucket, Error, ObjectAttrs, Result, WriteSink};

use crate::sink::{FileSink, MultiWriter};

/// Format of the per-run timestamp directory.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Kind of operational artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Logs captured from containers.
    ContainerLogs,
    /// Cluster events for a release's pods.
    PodEvents,
    /// Rendered or live resource manifests.
    Resources,
    /// Anything else, named by the caller.
    Custom(String),
}

impl ArtifactKind {
    /// Path segment for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ContainerLogs => "container-logs",
            Self::PodEvents => "pod-events",
            Self::Resources => "resources",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container-logs" => Ok(Self::ContainerLogs),
            "pod-events" => Ok(Self::PodEvents),
            "resources" => Ok(Self::Resources),
            other => {
                validate_segment("artifact kind", other)?;
                Ok(Self::Custom(other.to_string()))
            }
        }
    }
}

/// The destination and release an artifact belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTarget {
    /// Deployment destination (cluster, environment).
    pub destination: String,
    /// Release name.
    pub release: String,
}

impl ArtifactTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(destination: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            release: release.into(),
        }
    }
}

/// Where an artifact can be found. Either field may be unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Local filesystem path.
    pub path: Option<PathBuf>,
    /// Cloud console URL for the uploaded copy.
    pub cloud_console_url: Option<String>,
}

/// Options for an artifact manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactOptions {
    /// Local directory to write artifacts under. Unset disables local copies.
    pub local_dir: Option<PathBuf>,
    /// Fixed timestamp instead of the creation time.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ArtifactOptions {
    /// Sets the local directory.
    #[must_use]
    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    /// Pins the timestamp directory.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty local directory.
    pub fn validate(&self) -> Result<()> {
        if self
            .local_dir
            .as_ref()
            .is_some_and(|d| d.as_os_str().is_empty())
        {
            return Err(Error::InvalidArgument("local dir cannot be empty".into()));
        }
        Ok(())
    }
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(Error::InvalidArgument(format!(
            "{what} must be a single path segment (got {value:?})"
        )));
    }
    Ok(())
}

/// Builds artifact writers for one run.
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    local_dir: Option<PathBuf>,
    bucket: Option<Bucket>,
    timestamp: String,
}

impl ArtifactManager {
    /// Creates a manager writing locally, to `bucket`, both, or neither.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the options are invalid.
    pub fn new(options: ArtifactOptions, bucket: Option<Bucket>) -> Result<Self> {
        options.validate()?;
        let timestamp = options
            .timestamp
            .unwrap_or_else(Utc::now)
            .format(TIMESTAMP_FORMAT)
            .to_string();
        Ok(Self {
            local_dir: options.local_dir,
            bucket,
            timestamp,
        })
    }

    /// The frozen timestamp segment.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `<destination>/<release>/<kind>/<timestamp>`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a component is not a single path segment.
    pub fn base_path(&self, target: &ArtifactTarget, kind: &ArtifactKind) -> Result<String> {
        validate_segment("destination", &target.destination)?;
        validate_segment("release", &target.release)?;
        validate_segment("artifact kind", kind.as_str())?;
        Ok(format!(
            "{}/{}/{}/{}",
            target.destination, target.release, kind, self.timestamp
        ))
    }

    /// Where the artifacts of `kind` for `target` end up.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for invalid target components.
    pub fn location(&self, target: &ArtifactTarget, kind: &ArtifactKind) -> Result<Location> {
        let base = self.base_path(target, kind)?;
        Ok(Location {
            path: self.local_dir.as_ref().map(|d| d.join(&base)),
            cloud_console_url: self
                .bucket
                .as_ref()
                .map(|b| b.console_list_url(&format!("{base}/"))),
        })
    }

    /// Opens a writer for one artifact file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for invalid names, or an `Io` error if the
    /// local directory or file cannot be created.
    pub async fn writer(
        &self,
        target: &ArtifactTarget,
        kind: &ArtifactKind,
        file_name: &str,
    ) -> Result<MultiWriter> {
        self.writer_with(target, kind, file_name, Vec::new()).await
    }

    /// Like [`writer`](Self::writer), adding caller-supplied sinks after the
    /// local file and the upload.
    ///
    /// # Errors
    ///
    /// Same as [`writer`](Self::writer).
    pub async fn writer_with(
        &self,
        target: &ArtifactTarget,
        kind: &ArtifactKind,
        file_name: &str,
        extra_sinks: Vec<Box<dyn WriteSink>>,
    ) -> Result<MultiWriter> {
        validate_segment("file name", file_name)?;
        let base = self.base_path(target, kind)?;
        let mut writer = MultiWriter::default();

        if let Some(dir) = &self.local_dir {
            let dir = dir.join(&base);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::io(format!("create {}", dir.display()), e))?;
            writer.push(Box::new(FileSink::open(dir.join(file_name)).await?));
        }

        if let Some(bucket) = &self.bucket {
            let object = format!("{base}/{file_name}");
            writer.push(Box::new(bucket.writer_with(
                &object,
                ObjectAttrs::new().with_content_type("text/plain; charset=utf-8"),
            )));
        }

        for sink in extra_sinks {
            writer.push(sink);
        }

        tracing::debug!(
            artifact = %format!("{base}/{file_name}"),
            sinks = writer.len(),
            "opened artifact writer"
        );
        Ok(writer)
    }
}
