//! Chart repository commands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};
use fleet_charts::{ChartRepo, DEFAULT_LOCK_OBJECT, RepoOptions};
use serde_json::json;

use crate::{BucketArgs, Config, OutputFormat};

/// Repository options shared by chart commands.
#[derive(Debug, Clone, Args)]
pub struct RepoArgs {
    /// How long to wait for the repository lock.
    #[arg(long, default_value = "2m", value_parser = humantime::parse_duration)]
    pub lock_wait: Duration,

    /// Age after which a repository lock is reclaimed.
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub lock_expire: Duration,

    /// Lock object name.
    #[arg(long, default_value = DEFAULT_LOCK_OBJECT)]
    pub lock_object: String,

    /// Refuse uploads without the repository lock.
    #[arg(long)]
    pub enforce_lock: bool,
}

impl RepoArgs {
    fn options(&self) -> RepoOptions {
        RepoOptions::default()
            .with_lock_wait_timeout(self.lock_wait)
            .with_lock_expire_timeout(self.lock_expire)
            .with_lock_object(self.lock_object.clone())
            .with_enforce_lock(self.enforce_lock)
    }
}

/// Chart repository operations.
#[derive(Debug, Subcommand)]
pub enum ChartsCommand {
    /// Print the repository's public URL.
    Url {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
    },
    /// Check whether the repository has an index.
    HasIndex {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
    },
    /// Download the index to a local file.
    DownloadIndex {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Destination file.
        local: PathBuf,
    },
    /// Upload charts and the index under the repository lock.
    Publish {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Repository options.
        #[command(flatten)]
        repo: RepoArgs,
        /// Regenerated index file.
        #[arg(long)]
        index: PathBuf,
        /// Chart archives to upload.
        charts: Vec<PathBuf>,
    },
}

/// Execute a chart command.
///
/// # Errors
///
/// Returns an error if the bucket cannot be opened or the operation fails.
pub async fn execute(cmd: ChartsCommand, config: &Config) -> Result<()> {
    match cmd {
        ChartsCommand::Url { bucket } => {
            let repo = ChartRepo::new(config.open_bucket(&bucket).await?, RepoOptions::default())?;
            println!("{}", repo.url());
        }
        ChartsCommand::HasIndex { bucket } => {
            let repo = ChartRepo::new(config.open_bucket(&bucket).await?, RepoOptions::default())?;
            let has_index = repo.has_index().await?;
            match config.format {
                OutputFormat::Json => println!("{}", json!({ "hasIndex": has_index })),
                OutputFormat::Text => println!("{has_index}"),
            }
        }
        ChartsCommand::DownloadIndex { bucket, local } => {
            let repo = ChartRepo::new(config.open_bucket(&bucket).await?, RepoOptions::default())?;
            repo.download_index(&local).await?;
        }
        ChartsCommand::Publish {
            bucket,
            repo,
            index,
            charts,
        } => {
            let mut repo = ChartRepo::new(config.open_bucket(&bucket).await?, repo.options())?;
            repo.publish(&charts, &index).await?;
            tracing::info!(charts = charts.len(), repo = %repo.url(), "published");
        }
    }
    Ok(())
}
