//! Configuration for forwarders and repositories.
//!
//! Plain options structs with defaults; the CLI deserializes them from a
//! config file and `ICND_`-prefixed environment variables and applies
//! flag overrides on top.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::codec::{BincodeCodec, PacketCodec, TextCodec};
use crate::{
    DEFAULT_AGEING_INTERVAL_SECS, DEFAULT_CS_TTL_SECS, DEFAULT_LINK_PORT, DEFAULT_PIT_TTL_SECS,
    DEFAULT_RIB_COMPILE_INTERVAL_SECS,
};
use rust_icnd_common::types::DEFAULT_CS_CAPACITY;

/// Which wire codec the encoding layer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Text,
    Bincode,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn PacketCodec> {
        match self {
            CodecKind::Text => Arc::new(TextCodec::new()),
            CodecKind::Bincode => Arc::new(BincodeCodec::new()),
        }
    }
}

/// A prefix repositories may register under, as it appears in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPrefixConfig {
    pub name: String,
    #[serde(default)]
    pub global: bool,
}

/// A statically configured route: a prefix reachable via a peer address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRoute {
    pub prefix: String,
    pub next_hop: String,
}

/// Forwarder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderOptions {
    /// Address the link socket binds to.
    pub listen_addr: String,

    /// Address announced in autoconfig manifests.
    pub announce_addr: String,

    /// Run the autoconfig server stage.
    pub autoconfig: bool,

    /// Deliver non-autoconfig Interests to the stage above the autoconfig
    /// server instead of reflecting them back down.
    pub interest_to_app: bool,

    pub codec: CodecKind,

    pub cs_capacity: usize,
    pub cs_ttl_secs: u64,
    pub pit_ttl_secs: u64,
    pub ageing_interval_secs: u64,

    /// Compile only the minimal-distance route per name into the FIB.
    pub shortest_routes_only: bool,
    pub rib_compile_interval_secs: u64,

    /// Prefixes repositories may register services under.
    pub registration_prefixes: Vec<RegistrationPrefixConfig>,

    /// Routes seeded at startup as static FIB entries.
    pub routes: Vec<StaticRoute>,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_LINK_PORT}"),
            announce_addr: "127.0.0.1".to_string(),
            autoconfig: false,
            interest_to_app: false,
            codec: CodecKind::Text,
            cs_capacity: DEFAULT_CS_CAPACITY,
            cs_ttl_secs: DEFAULT_CS_TTL_SECS,
            pit_ttl_secs: DEFAULT_PIT_TTL_SECS,
            ageing_interval_secs: DEFAULT_AGEING_INTERVAL_SECS,
            shortest_routes_only: true,
            rib_compile_interval_secs: DEFAULT_RIB_COMPILE_INTERVAL_SECS,
            registration_prefixes: Vec::new(),
            routes: Vec::new(),
        }
    }
}

/// Repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoOptions {
    /// The repository's name; becomes the last component of the served
    /// prefix.
    pub name: String,

    /// Address the repository's link socket binds to.
    pub listen_addr: String,

    /// Address announced to the forwarder during registration.
    pub announce_addr: String,

    /// Broadcast address (with port) forwarder solicitations go to.
    pub broadcast_addr: String,

    pub register_local: bool,
    pub register_global: bool,

    pub codec: CodecKind,

    /// Prefix served before any registration succeeds.
    pub initial_prefix: String,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            name: "repo".to_string(),
            listen_addr: "0.0.0.0:0".to_string(),
            announce_addr: "127.0.0.1".to_string(),
            broadcast_addr: format!("255.255.255.255:{DEFAULT_LINK_PORT}"),
            register_local: true,
            register_global: true,
            codec: CodecKind::Text,
            initial_prefix: "/unconfigured".to_string(),
        }
    }
}
