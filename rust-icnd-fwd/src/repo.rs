//! Repository-side helpers.
//!
//! The repository storage backend proper is outside the forwarder; this
//! module provides the pieces the autoconfig client needs to drive one: a
//! shared served-prefix cell, and a minimal in-memory repository stage
//! that answers Interests under that prefix.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use rust_icnd_common::{
    name::Name,
    packet::{Content, Nack, NackReason, Packet},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::stage::{recv_or_stop, PacketRx, PacketTx, Stage, StopSignal};

/// The prefix a repository currently serves.
///
/// The autoconfig client rewrites it when a registration is acknowledged;
/// the serving side reads it on every lookup.
#[derive(Debug, Clone)]
pub struct PrefixHandle(Arc<RwLock<Name>>);

impl PrefixHandle {
    pub fn new(initial: Name) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    pub fn get(&self) -> Name {
        self.0.read().unwrap().clone()
    }

    pub fn set(&self, name: Name) {
        info!("served prefix is now {name}");
        *self.0.write().unwrap() = name;
    }
}

/// In-memory content producer: objects are stored under names relative to
/// the served prefix, so a prefix rewrite moves the whole catalogue.
#[derive(Debug)]
pub struct MemoryRepo {
    prefix: PrefixHandle,
    objects: Mutex<HashMap<Name, Bytes>>,
}

impl MemoryRepo {
    pub fn new(prefix: PrefixHandle) -> Self {
        Self {
            prefix,
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn prefix_handle(&self) -> PrefixHandle {
        self.prefix.clone()
    }

    /// Store an object under `suffix`, relative to the served prefix.
    pub fn insert(&self, suffix: Name, payload: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(suffix, payload.into());
    }

    /// Resolve a full name against the current prefix and catalogue.
    pub fn lookup(&self, name: &Name) -> Option<Bytes> {
        let prefix = self.prefix.get();
        if !prefix.is_prefix_of(name) {
            return None;
        }
        let suffix = name.suffix(prefix.len());
        self.objects.lock().unwrap().get(&suffix).cloned()
    }
}

/// Application stage serving a [`MemoryRepo`] above the autoconfig client.
pub struct RepoApp {
    repo: Arc<MemoryRepo>,

    pub queue_from_lower: Option<PacketRx>,
    pub queue_to_lower: Option<PacketTx>,

    stop: StopSignal,
}

impl RepoApp {
    pub fn new(repo: Arc<MemoryRepo>) -> Self {
        Self {
            repo,
            queue_from_lower: None,
            queue_to_lower: None,
            stop: StopSignal::new(),
        }
    }
}

#[async_trait]
impl Stage for RepoApp {
    fn name(&self) -> &'static str {
        "repo"
    }

    async fn start(&mut self) -> Result<()> {
        if self.stop.is_running() {
            return Ok(());
        }
        let mut from_lower = self
            .queue_from_lower
            .take()
            .context("repo stage started without a lower input queue")?;
        let to_lower = self
            .queue_to_lower
            .take()
            .context("repo stage started without a lower output queue")?;
        let repo = Arc::clone(&self.repo);
        let mut stop = self.stop.subscribe();

        self.stop.register(tokio::spawn(async move {
            loop {
                let Some((fid, packet)) = recv_or_stop(&mut from_lower, &mut stop).await else {
                    break;
                };
                match packet {
                    Packet::Interest(interest) => {
                        let reply: Packet = match repo.lookup(&interest.name) {
                            Some(payload) => {
                                Content::new(interest.name.clone(), payload).into()
                            }
                            None => {
                                debug!("repo has nothing for {}", interest.name);
                                Nack::new(interest.name.clone(), NackReason::NoContent)
                                    .with_interest(interest)
                                    .into()
                            }
                        };
                        if to_lower.send((fid, reply)).await.is_err() {
                            warn!("repo: lower queue closed");
                            break;
                        }
                    }
                    other => {
                        debug!("repo: ignoring {} for {}", other.packet_type(), other.name());
                    }
                }
            }
            debug!("repo worker exited");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop.stop().await;
    }
}
