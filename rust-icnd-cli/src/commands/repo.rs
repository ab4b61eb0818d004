//! `icnd repo`: run an autoconfiguring repository until interrupted.

use anyhow::{bail, Context, Result};
use log::info;
use rust_icnd_common::name::Name;
use rust_icnd_fwd::forwarder::Repository;
use rust_icnd_fwd::RepoOptions;
use std::path::PathBuf;

use crate::commands::load_options;

pub async fn run(
    config: Option<PathBuf>,
    name: Option<String>,
    broadcast: Option<String>,
    objects: Vec<String>,
) -> Result<()> {
    let mut options: RepoOptions = load_options(config)?;
    if let Some(name) = name {
        options.name = name;
    }
    if let Some(broadcast) = broadcast {
        options.broadcast_addr = broadcast;
    }

    let mut repository = Repository::new(options)
        .await
        .context("failed to set up the repository")?;
    for object in objects {
        let Some((name, value)) = object.split_once('=') else {
            bail!("object {object:?} is not a name=value pair");
        };
        repository
            .repo()
            .insert(Name::from_string(name), value.to_string());
    }
    repository.start().await?;
    println!("Repository listening on {}", repository.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    info!("shutting down");
    repository.stop().await;
    Ok(())
}
