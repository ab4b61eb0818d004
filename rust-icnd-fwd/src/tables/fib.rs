//! Forwarding Information Base: longest-prefix routing table.

use rust_icnd_common::{metrics::ForwarderMetrics, name::Name, types::FaceId};
use std::sync::{Arc, Mutex};

/// One route: a name prefix leading to a face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibEntry {
    pub prefix: Name,
    pub face: FaceId,
    /// Static entries survive RIB recompilation.
    pub static_entry: bool,
}

/// Prefix-match FIB.
///
/// At most one entry exists per `(prefix, face)` pair. Lookup returns the
/// entry with the longest prefix of the queried name; ties are broken
/// deterministically towards the smallest face id.
#[derive(Debug, Default)]
pub struct Fib {
    entries: Vec<FibEntry>,
    metrics: Arc<ForwarderMetrics>,
}

impl Fib {
    pub fn new(metrics: Arc<ForwarderMetrics>) -> Self {
        Self {
            entries: Vec::new(),
            metrics,
        }
    }

    pub fn insert(&mut self, prefix: Name, face: FaceId, static_entry: bool) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.prefix == prefix && e.face == face)
        {
            // never demote an existing static route
            existing.static_entry |= static_entry;
        } else {
            self.entries.push(FibEntry {
                prefix,
                face,
                static_entry,
            });
        }
        self.metrics.fib_size.set(self.entries.len() as u64);
    }

    /// Longest-prefix match; smallest face id wins among equally long
    /// prefixes.
    pub fn find_longest_prefix(&self, name: &Name) -> Option<FibEntry> {
        let best = self
            .entries
            .iter()
            .filter(|e| e.prefix.is_prefix_of(name))
            .max_by(|a, b| {
                a.prefix
                    .len()
                    .cmp(&b.prefix.len())
                    .then(b.face.cmp(&a.face))
            })
            .cloned();
        if best.is_some() {
            self.metrics.fib_hits.increment();
        } else {
            self.metrics.fib_misses.increment();
        }
        best
    }

    /// Remove every face entry stored under `prefix`.
    pub fn remove(&mut self, prefix: &Name) {
        self.entries.retain(|e| &e.prefix != prefix);
        self.metrics.fib_size.set(self.entries.len() as u64);
    }

    pub fn clear_non_static(&mut self) {
        self.entries.retain(|e| e.static_entry);
        self.metrics.fib_size.set(self.entries.len() as u64);
    }

    /// Replace all non-static entries in one step; used by the RIB
    /// compiler so lookups only ever observe a complete route set.
    pub fn replace_non_static(&mut self, routes: impl IntoIterator<Item = (Name, FaceId)>) {
        self.entries.retain(|e| e.static_entry);
        for (prefix, face) in routes {
            self.insert(prefix, face, false);
        }
    }

    pub fn entries(&self) -> &[FibEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedFib = Arc<Mutex<Fib>>;
