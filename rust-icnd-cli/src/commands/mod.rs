//! Subcommand implementations.

pub mod forwarder;
pub mod interest;
pub mod repo;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Load an options struct from an optional config file plus `ICND_`
/// environment variables. Missing sources fall back to the defaults baked
/// into the struct.
pub fn load_options<T: DeserializeOwned>(path: Option<PathBuf>) -> Result<T> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    builder = builder.add_source(config::Environment::with_prefix("ICND").separator("__"));
    builder
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("invalid configuration")
}
