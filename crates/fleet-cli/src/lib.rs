//! # fleet-cli
//!
//! Command-line interface for fleet storage operations.
//!
//! ## Commands
//!
//! - `fleet bucket` - Inspect and modify objects
//! - `fleet lock` - Acquire and release advisory locks
//! - `fleet charts` - Work with a chart repository
//! - `fleet artifacts` - Capture operational artifacts
//!
//! ## Configuration
//!
//! Settings come from flags or environment variables:
//!
//! - `FLEET_BUCKET` / `FLEET_BUCKET_PREFIX` - Target bucket and key prefix
//! - `FLEET_GCS_ENDPOINT` - Storage endpoint override (emulators)
//! - `FLEET_GCS_ANONYMOUS` - Skip credentials
//! - `FLEET_LOG_FORMAT` - `pretty` or `json`
//! - `FLEET_ARTIFACTS_DIR` - Local artifact directory

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fleet_core::{
    Bucket, BucketFactory, BucketOptions, CancellationToken, GcsBucketFactory, GcsClientOptions,
    LogFormat,
};

/// Fleet CLI - object storage, locks, chart repositories and artifacts.
#[derive(Debug, Parser)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log output format.
    #[arg(long, env = "FLEET_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Storage endpoint override.
    #[arg(long, env = "FLEET_GCS_ENDPOINT", global = true)]
    pub gcs_endpoint: Option<String>,

    /// Send requests without credentials.
    #[arg(long, env = "FLEET_GCS_ANONYMOUS", global = true)]
    pub anonymous: bool,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `FLEET_GCS_*` variables cannot be parsed.
    pub fn config(&self, cancel: CancellationToken) -> Result<Config> {
        let mut client =
            GcsClientOptions::from_env().context("invalid FLEET_GCS_* environment")?;
        if let Some(endpoint) = &self.gcs_endpoint {
            client = client.with_endpoint(endpoint.clone());
        }
        if self.anonymous {
            client = client.with_anonymous(true);
        }
        client.validate()?;

        Ok(Config {
            client,
            format: self.format.clone(),
            cancel,
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Inspect and modify objects.
    #[command(subcommand)]
    Bucket(commands::bucket::BucketCommand),
    /// Acquire and release advisory locks.
    #[command(subcommand)]
    Lock(commands::lock::LockCommand),
    /// Work with a chart repository.
    #[command(subcommand)]
    Charts(commands::charts::ChartsCommand),
    /// Capture operational artifacts.
    #[command(subcommand)]
    Artifacts(commands::artifacts::ArtifactsCommand),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// Bucket selection shared by every command.
#[derive(Debug, Clone, Args)]
pub struct BucketArgs {
    /// Bucket name.
    #[arg(long, env = "FLEET_BUCKET")]
    pub bucket: String,

    /// Key prefix applied to every object name.
    #[arg(long, env = "FLEET_BUCKET_PREFIX", default_value = "")]
    pub prefix: String,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage client options.
    pub client: GcsClientOptions,
    /// Output format.
    pub format: OutputFormat,
    /// Cancelled on Ctrl-C.
    pub cancel: CancellationToken,
}

impl Config {
    /// Opens the bucket selected by `args`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket handle cannot be created.
    pub async fn open_bucket(&self, args: &BucketArgs) -> Result<Bucket> {
        let options = BucketOptions::default()
            .with_prefix(args.prefix.clone())
            .with_client_options(self.client.clone())
            .with_cancellation(self.cancel.child_token());
        GcsBucketFactory
            .bucket(&args.bucket, options)
            .await
            .with_context(|| format!("failed to open bucket {}", args.bucket))
    }
}

/// Runs a parsed command line.
///
/// # Errors
///
/// Returns the command's error.
pub async fn run(cli: Cli, config: &Config) -> Result<()> {
    match cli.command {
        Commands::Bucket(cmd) => commands::bucket::execute(cmd, config).await,
        Commands::Lock(cmd) => commands::lock::execute(cmd, config).await,
        Commands::Charts(cmd) => commands::charts::execute(cmd, config).await,
        Commands::Artifacts(cmd) => commands::artifacts::execute(cmd, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "fleet",
            "bucket",
            "exists",
            "--bucket",
            "my-bucket",
            "index.yaml",
            "--log-format",
            "json",
            "--gcs-endpoint",
            "http://localhost:4443",
            "--anonymous",
        ]);

        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.gcs_endpoint.as_deref(), Some("http://localhost:4443"));
        assert!(cli.anonymous);
        assert!(matches!(
            cli.command,
            Commands::Bucket(commands::bucket::BucketCommand::Exists { .. })
        ));
    }

    #[test]
    fn test_duration_flags_use_humantime() {
        let cli = Cli::parse_from([
            "fleet",
            "lock",
            "acquire",
            "--bucket",
            "b",
            "deploy.lk",
            "--max-wait",
            "1m 30s",
            "--backoff",
            "250ms",
        ]);
        let Commands::Lock(commands::lock::LockCommand::Acquire {
            max_wait, backoff, ..
        }) = cli.command
        else {
            panic!("expected lock acquire");
        };
        assert_eq!(max_wait, Duration::from_secs(90));
        assert_eq!(backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_overflowing_duration_is_a_parse_error() {
        for value in ["18446744073709551615m", "18446744073709551615h", "99999999999999999999s"] {
            let parsed = Cli::try_parse_from([
                "fleet",
                "lock",
                "acquire",
                "--bucket",
                "b",
                "deploy.lk",
                "--max-wait",
                value,
            ]);
            let err = parsed.expect_err("overflow must be rejected");
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation, "{value}");
        }
    }

    #[test]
    fn test_bad_duration_is_a_parse_error() {
        let parsed = Cli::try_parse_from([
            "fleet", "charts", "publish", "--bucket", "b", "--index", "i.yaml", "--lock-wait",
            "soon",
        ]);
        assert!(parsed.is_err());
    }
}
