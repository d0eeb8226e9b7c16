//! Lock commands - acquire and release advisory locks.
//!
//! `acquire` prints the lock generation; pass it back to `release`. Anyone
//! holding the generation can release the lock, so treat it like a token.

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use fleet_core::{Generation, LockOptions};
use serde_json::json;

use crate::{BucketArgs, Config, OutputFormat};

/// Lock operations.
#[derive(Debug, Subcommand)]
pub enum LockCommand {
    /// Acquire a lock and print its generation.
    Acquire {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Lock object name.
        name: String,
        /// How long to wait for the lock.
        #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
        max_wait: Duration,
        /// Age after which an existing lock is reclaimed (0 disables).
        #[arg(long, default_value = "0", value_parser = humantime::parse_duration)]
        expires_after: Duration,
        /// First backoff interval between attempts.
        #[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
        backoff: Duration,
        /// Backoff growth factor.
        #[arg(long, default_value_t = 2.0)]
        backoff_multiplier: f64,
    },
    /// Release a lock by generation.
    Release {
        /// Target bucket.
        #[command(flatten)]
        bucket: BucketArgs,
        /// Lock object name.
        name: String,
        /// Generation printed by `acquire`.
        generation: Generation,
    },
}

/// Execute a lock command.
///
/// # Errors
///
/// Returns an error if the lock cannot be acquired or released.
pub async fn execute(cmd: LockCommand, config: &Config) -> Result<()> {
    match cmd {
        LockCommand::Acquire {
            bucket,
            name,
            max_wait,
            expires_after,
            backoff,
            backoff_multiplier,
        } => {
            let bucket = config.open_bucket(&bucket).await?;
            let options = LockOptions::default()
                .with_expires_after(expires_after)
                .with_backoff_starting_interval(backoff)
                .with_backoff_multiplier(backoff_multiplier);
            let lock = bucket.new_lock(&name, max_wait, options);
            let generation = lock.acquire().await?;
            match config.format {
                OutputFormat::Json => println!(
                    "{}",
                    json!({ "url": lock.url(), "generation": generation.get() })
                ),
                OutputFormat::Text => println!("{generation}"),
            }
        }
        LockCommand::Release {
            bucket,
            name,
            generation,
        } => {
            let bucket = config.open_bucket(&bucket).await?;
            bucket
                .new_lock(&name, Duration::ZERO, LockOptions::default())
                .release(generation)
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
    fn test_acquire_defaults() {
        let cli = Cli::parse_from(["fleet", "lock", "acquire", "--bucket", "b", "deploy.lk"]);
        let Commands::Lock(LockCommand::Acquire {
            max_wait,
            expires_after,
            backoff,
            ..
        }) = cli.command
        else {
            panic!("expected lock acquire");
        };
        assert_eq!(max_wait, Duration::from_secs(60));
        assert_eq!(expires_after, Duration::ZERO);
        assert_eq!(backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_release_parses_generation() {
        let cli = Cli::parse_from([
            "fleet",
            "lock",
            "release",
            "--bucket",
            "b",
            "deploy.lk",
            "1712345678901234",
        ]);
        let Commands::Lock(LockCommand::Release { generation, .. }) = cli.command else {
            panic!("expected lock release");
        };
        assert_eq!(generation, Generation::new(1_712_345_678_901_234));
    }
}
