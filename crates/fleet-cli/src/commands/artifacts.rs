//! Artifact commands - capture stdin into artifact files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use fleet_artifacts::{ArtifactKind, ArtifactManager, ArtifactOptions, ArtifactTarget, WriteSink};
use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::{Config, OutputFormat};

/// Artifact operations.
#[derive(Debug, Subcommand)]
pub enum ArtifactsCommand {
    /// Tee stdin into a local artifact file and a bucket object.
    Capture {
        /// Deployment destination.
        #[arg(long)]
        destination: String,
        /// Release name.
        #[arg(long)]
        release: String,
        /// Artifact kind (container-logs, pod-events, resources, or custom).
        #[arg(long, default_value = "container-logs")]
        kind: ArtifactKind,
        /// Artifact file name.
        #[arg(long)]
        file: String,
        /// Local artifact directory.
        #[arg(long, env = "FLEET_ARTIFACTS_DIR")]
        dir: Option<PathBuf>,
        /// Bucket to upload to.
        #[arg(long, env = "FLEET_BUCKET")]
        bucket: Option<String>,
        /// Key prefix in the bucket.
        #[arg(long, env = "FLEET_BUCKET_PREFIX", default_value = "")]
        prefix: String,
    },
}

/// Execute an artifact command.
///
/// # Errors
///
/// Returns an error if no output is configured, or reading stdin or writing
/// an artifact sink fails.
pub async fn execute(cmd: ArtifactsCommand, config: &Config) -> Result<()> {
    let ArtifactsCommand::Capture {
        destination,
        release,
        kind,
        file,
        dir,
        bucket,
        prefix,
    } = cmd;

    if dir.is_none() && bucket.is_none() {
        anyhow::bail!("nothing to capture into: set --dir, --bucket, or both");
    }

    let bucket = match bucket {
        Some(name) => Some(
            config
                .open_bucket(&crate::BucketArgs {
                    bucket: name,
                    prefix,
                })
                .await?,
        ),
        None => None,
    };
    let options = ArtifactOptions {
        local_dir: dir,
        ..ArtifactOptions::default()
    };
    let manager = ArtifactManager::new(options, bucket)?;
    let target = ArtifactTarget::new(destination, release);

    let mut writer = manager.writer(&target, &kind, &file).await?;
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0_u8; 64 * 1024];
    let mut total = 0_usize;
    loop {
        let n = stdin.read(&mut buf).await.context("failed to read stdin")?;
        if n == 0 {
            break;
        }
        writer.write(&buf[..n]).await?;
        total += n;
    }
    writer.close().await?;

    let location = manager.location(&target, &kind)?;
    match config.format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "bytes": total,
                "path": location.path.map(|p| p.join(&file).display().to_string()),
                "cloudConsoleUrl": location.cloud_console_url,
            })
        ),
        OutputFormat::Text => {
            if let Some(path) = location.path {
                println!("local: {}", path.join(&file).display());
            }
            if let Some(url) = location.cloud_console_url {
                println!("cloud: {url}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use clap::Parser;

    #[test]
    fn test_capture_custom_kind() {
        let cli = Cli::parse_from([
            "fleet",
            "artifacts",
            "capture",
            "--destination",
            "prod-us",
            "--release",
            "web",
            "--kind",
            "helm-history",
            "--file",
            "history.txt",
            "--dir",
            "/tmp/artifacts",
        ]);
        let Commands::Artifacts(ArtifactsCommand::Capture { kind, dir, .. }) = cli.command else {
            panic!("expected artifacts capture");
        };
        assert_eq!(kind, ArtifactKind::Custom("helm-history".to_string()));
        assert_eq!(dir, Some(PathBuf::from("/tmp/artifacts")));
    }

    #[test]
    fn test_capture_rejects_bad_kind() {
        let parsed = Cli::try_parse_from([
            "fleet",
            "artifacts",
            "capture",
            "--destination",
            "prod-us",
            "--release",
            "web",
            "--kind",
            "../etc",
            "--file",
            "x.txt",
        ]);
        assert!(parsed.is_err());
    }
}
