//! `icnd forwarder`: run a forwarder until interrupted.

use anyhow::{Context, Result};
use log::info;
use rust_icnd_fwd::{ForwarderOptions, IcnForwarder};
use std::path::PathBuf;

use crate::commands::load_options;

pub async fn run(
    config: Option<PathBuf>,
    listen: Option<String>,
    autoconfig: bool,
) -> Result<()> {
    let mut options: ForwarderOptions = load_options(config)?;
    if let Some(listen) = listen {
        options.listen_addr = listen;
    }
    if autoconfig {
        options.autoconfig = true;
    }

    let mut forwarder = IcnForwarder::new(options)
        .await
        .context("failed to set up the forwarder")?;
    forwarder.start().await?;
    println!("Forwarder listening on {}", forwarder.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    info!("shutting down");
    forwarder.stop().await;

    let snapshot = forwarder.metrics().snapshot();
    println!(
        "Handled {} Interests ({} forwarded, {} satisfied from cache)",
        snapshot.interests_received, snapshot.interests_forwarded, snapshot.cs_hits,
    );
    Ok(())
}
