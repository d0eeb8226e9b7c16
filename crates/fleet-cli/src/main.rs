//! Fleet CLI - storage, locks, chart repositories and artifacts.
//!
//! The main entry point for the `fleet` binary.

use anyhow::Result;
use clap::Parser;

use fleet_cli::Cli;
use fleet_core::{CancellationToken, init_logging};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let cancel = CancellationToken::new();
    let config = cli.config(cancel.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
        fleet_cli::run(cli, &config).await
    })
}
