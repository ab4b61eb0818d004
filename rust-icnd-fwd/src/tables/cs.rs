//! Content store: exact-match, memory-resident cache of Content.

use rust_icnd_common::{metrics::ForwarderMetrics, name::Name, packet::Content};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One cached content object.
#[derive(Debug, Clone)]
pub struct CsEntry {
    pub content: Content,
    /// Static entries are never evicted by aging or capacity pressure.
    pub static_entry: bool,
    pub timestamp: Instant,
}

/// Exact-match content store with bounded capacity and TTL aging.
///
/// At most one entry exists per name; re-inserting replaces the entry and
/// refreshes its timestamp. Under capacity pressure the oldest non-static
/// entry is evicted.
#[derive(Debug)]
pub struct ContentStore {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<Name, CsEntry>,
    metrics: Arc<ForwarderMetrics>,
}

impl ContentStore {
    pub fn new(capacity: usize, ttl: Duration, metrics: Arc<ForwarderMetrics>) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
            metrics,
        }
    }

    /// Insert a content object, evicting the oldest non-static entry if
    /// the store is full. A full store of static entries rejects the
    /// insert.
    pub fn insert(&mut self, content: Content, static_entry: bool) {
        let name = content.name.clone();
        if !self.entries.contains_key(&name) && self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| !e.static_entry)
                .min_by_key(|(_, e)| e.timestamp)
                .map(|(n, _)| n.clone());
            match victim {
                Some(victim) => {
                    self.entries.remove(&victim);
                    self.metrics.cs_evictions.increment();
                }
                None => {
                    log::warn!("content store full of static entries, dropping {name}");
                    return;
                }
            }
        }
        self.entries.insert(
            name,
            CsEntry {
                content,
                static_entry,
                timestamp: Instant::now(),
            },
        );
        self.metrics.cs_inserts.increment();
        self.metrics.cs_size.set(self.entries.len() as u64);
    }

    /// Exact-name lookup.
    pub fn find(&self, name: &Name) -> Option<&CsEntry> {
        let entry = self.entries.get(name);
        if entry.is_some() {
            self.metrics.cs_hits.increment();
        } else {
            self.metrics.cs_misses.increment();
        }
        entry
    }

    pub fn remove(&mut self, name: &Name) -> Option<CsEntry> {
        let removed = self.entries.remove(name);
        self.metrics.cs_size.set(self.entries.len() as u64);
        removed
    }

    /// Refresh the timestamp of an entry.
    pub fn touch(&mut self, name: &Name) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.timestamp = Instant::now();
        }
    }

    /// Drop non-static entries older than the TTL. Returns how many were
    /// removed.
    pub fn age(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| e.static_entry || now.duration_since(e.timestamp) <= ttl);
        let removed = before - self.entries.len();
        self.metrics.cs_expired.add(removed as u64);
        self.metrics.cs_size.set(self.entries.len() as u64);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedContentStore = Arc<Mutex<ContentStore>>;
