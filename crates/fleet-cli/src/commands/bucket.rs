//! Bucket commands - inspect and modify objects.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use fleet_core::{Generation, ObjectAttrs, ObjectMeta, WritePrecondition};
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::{BucketArgs, Config, OutputFormat};

/// Object operations.
#[derive(Debug, Subcommand)]
pub enum BucketCommand {
    /// Check whether an object exists.
    Exists {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Object name.
        name: String,
    },
    /// Print an object's content to stdout.
    Cat {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Object name.
        name: String,
    },
    /// Upload a local file.
    Put {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Local file.
        local: PathBuf,
        /// Object name.
        name: String,
        /// Content-Type to set.
        #[arg(long)]
        content_type: Option<String>,
        /// Cache-Control to set.
        #[arg(long)]
        cache_control: Option<String>,
        /// Only write if the object does not exist.
        #[arg(long, conflicts_with = "if_generation_match")]
        if_not_exists: bool,
        /// Only write if the object's generation matches.
        #[arg(long)]
        if_generation_match: Option<Generation>,
    },
    /// Delete an object. Missing objects are not an error.
    Rm {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Object name.
        name: String,
        /// Only delete if the object's generation matches.
        #[arg(long)]
        if_generation_match: Option<Generation>,
    },
    /// Show an object's metadata.
    Stat {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Object name.
        name: String,
    },
    /// List objects under a prefix.
    Ls {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Name prefix.
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Patch an object's attributes.
    SetAttrs {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Object name.
        name: String,
        /// Content-Type to set.
        #[arg(long)]
        content_type: Option<String>,
        /// Cache-Control to set.
        #[arg(long)]
        cache_control: Option<String>,
        /// Replacement metadata entries (`key=value`, repeatable).
        #[arg(long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
}

fn parse_key_value(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {value:?}"))
}

fn build_attrs(
    content_type: Option<String>,
    cache_control: Option<String>,
    metadata: Vec<(String, String)>,
) -> ObjectAttrs {
    let mut attrs = ObjectAttrs::new();
    attrs.content_type = content_type;
    attrs.cache_control = cache_control;
    if !metadata.is_empty() {
        attrs.metadata = Some(metadata.into_iter().collect::<HashMap<_, _>>());
    }
    attrs
}

fn meta_json(meta: &ObjectMeta) -> serde_json::Value {
    json!({
        "name": meta.name,
        "size": meta.size,
        "generation": meta.generation.get(),
        "created": meta.created.to_rfc3339(),
        "updated": meta.updated.to_rfc3339(),
        "contentType": meta.content_type,
        "cacheControl": meta.cache_control,
        "metadata": meta.metadata,
    })
}

/// Execute a bucket command.
///
/// # Errors
///
/// Returns an error if the bucket cannot be opened or the operation fails.
#[allow(clippy::too_many_lines)]
pub async fn execute(cmd: BucketCommand, config: &Config) -> Result<()> {
    match cmd {
        BucketCommand::Exists { bucket, name } => {
            let bucket = config.open_bucket(&bucket).await?;
            let exists = bucket.exists(&name).await?;
            match config.format {
                OutputFormat::Json => println!("{}", json!({ "name": name, "exists": exists })),
                OutputFormat::Text => println!("{exists}"),
            }
        }
        BucketCommand::Cat { bucket, name } => {
            let bucket = config.open_bucket(&bucket).await?;
            let data = bucket.read(&name).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await.context("failed to write stdout")?;
            stdout.flush().await.context("failed to flush stdout")?;
        }
        BucketCommand::Put {
            bucket,
            local,
            name,
            content_type,
            cache_control,
            if_not_exists,
            if_generation_match,
        } => {
            let bucket = config.open_bucket(&bucket).await?;
            let attrs = build_attrs(content_type, cache_control, Vec::new());
            let precondition = match (if_not_exists, if_generation_match) {
                (true, _) => WritePrecondition::DoesNotExist,
                (false, Some(g)) => WritePrecondition::GenerationMatch(g),
                (false, None) => WritePrecondition::None,
            };

            if precondition == WritePrecondition::None {
                bucket.upload(&local, &name, attrs).await?;
            } else {
                let data = tokio::fs::read(&local)
                    .await
                    .with_context(|| format!("failed to read {}", local.display()))?;
                let generation = bucket.write_if(&name, data, attrs, precondition).await?;
                tracing::debug!(%generation, "conditional write committed");
            }
            println!("{}", bucket.url(&name));
        }
        BucketCommand::Rm {
            bucket,
            name,
            if_generation_match,
        } => {
            let bucket = config.open_bucket(&bucket).await?;
            let precondition =
                if_generation_match.map_or(WritePrecondition::None, WritePrecondition::GenerationMatch);
            bucket.delete_if(&name, precondition).await?;
        }
        BucketCommand::Stat { bucket, name } => {
            let bucket = config.open_bucket(&bucket).await?;
            let meta = bucket.attrs(&name).await?;
            match config.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&meta_json(&meta))?),
                OutputFormat::Text => {
                    println!("url:           {}", bucket.url(&name));
                    println!("size:          {}", meta.size);
                    println!("created:       {}", meta.created.to_rfc3339());
                    println!("updated:       {}", meta.updated.to_rfc3339());
                    println!(
                        "content-type:  {}",
                        meta.content_type.as_deref().unwrap_or("-")
                    );
                    println!(
                        "cache-control: {}",
                        meta.cache_control.as_deref().unwrap_or("-")
                    );
                    let mut keys: Vec<_> = meta.metadata.iter().collect();
                    keys.sort();
                    for (k, v) in keys {
                        println!("metadata:      {k}={v}");
                    }
                }
            }
        }
        BucketCommand::Ls { bucket, prefix } => {
            let bucket = config.open_bucket(&bucket).await?;
            let listed = bucket.list(&prefix).await?;
            match config.format {
                OutputFormat::Json => {
                    let items: Vec<_> = listed.iter().map(meta_json).collect();
                    println!("{}", serde_json::to_string_pretty(&items)?);
                }
                OutputFormat::Text => {
                    for meta in &listed {
                        println!("{:>12}  {}", meta.size, meta.name);
                    }
                }
            }
        }
        BucketCommand::SetAttrs {
            bucket,
            name,
            content_type,
            cache_control,
            metadata,
        } => {
            let bucket = config.open_bucket(&bucket).await?;
            bucket
                .update(&name, build_attrs(content_type, cache_control, metadata))
                .await?;
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
    fn test_put_preconditions_conflict() {
        let parsed = Cli::try_parse_from([
            "fleet",
            "bucket",
            "put",
            "--bucket",
            "b",
            "--if-not-exists",
            "--if-generation-match",
            "7",
            "a.txt",
            "a.txt",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_set_attrs_metadata_pairs() {
        let cli = Cli::parse_from([
            "fleet",
            "bucket",
            "set-attrs",
            "--bucket",
            "b",
            "obj",
            "--metadata",
            "owner=ci",
            "--metadata",
            "tier=gold",
        ]);
        let Commands::Bucket(BucketCommand::SetAttrs { metadata, .. }) = cli.command else {
            panic!("expected set-attrs");
        };
        let attrs = build_attrs(None, None, metadata);
        let md = attrs.metadata.expect("metadata");
        assert_eq!(md.get("owner").map(String::as_str), Some("ci"));
        assert_eq!(md.get("tier").map(String::as_str), Some("gold"));
    }

    #[test]
    fn test_parse_key_value_requires_equals() {
        assert!(parse_key_value("novalue").is_err());
        assert_eq!(
            parse_key_value("a=b=c").expect("pair"),
            ("a".to_string(), "b=c".to_string())
        );
    }
}
