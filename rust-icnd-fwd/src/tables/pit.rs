//! Pending Interest Table: exact-match bookkeeping of outstanding
//! Interests.

use rust_icnd_common::{metrics::ForwarderMetrics, name::Name, types::FaceId};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One outstanding Interest.
///
/// `incoming` is never empty while the entry lives; `from_local` marks
/// entries created for application-originated Interests.
#[derive(Debug, Clone)]
pub struct PitEntry {
    pub name: Name,
    pub incoming: BTreeSet<FaceId>,
    pub outgoing: BTreeSet<FaceId>,
    pub timestamp: Instant,
    pub from_local: bool,
}

/// Exact-match PIT with TTL aging.
#[derive(Debug)]
pub struct Pit {
    ttl: Duration,
    entries: HashMap<Name, PitEntry>,
    metrics: Arc<ForwarderMetrics>,
}

impl Pit {
    pub fn new(ttl: Duration, metrics: Arc<ForwarderMetrics>) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            metrics,
        }
    }

    /// Create the entry for a freshly forwarded Interest. There is exactly
    /// one entry per pending name; a second add for the same name merges
    /// the faces instead.
    pub fn add_interest(
        &mut self,
        name: Name,
        incoming_face: FaceId,
        outgoing_face: FaceId,
        from_local: bool,
    ) {
        let entry = self.entries.entry(name.clone()).or_insert_with(|| {
            self.metrics.pit_inserts.increment();
            PitEntry {
                name,
                incoming: BTreeSet::new(),
                outgoing: BTreeSet::new(),
                timestamp: Instant::now(),
                from_local,
            }
        });
        entry.incoming.insert(incoming_face);
        entry.outgoing.insert(outgoing_face);
        self.metrics.pit_size.set(self.entries.len() as u64);
    }

    pub fn find(&self, name: &Name) -> Option<&PitEntry> {
        self.entries.get(name)
    }

    /// Aggregate a duplicate Interest onto the existing entry and refresh
    /// its timestamp.
    pub fn append_incoming(&mut self, name: &Name, face: FaceId) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.incoming.insert(face);
            entry.timestamp = Instant::now();
        }
    }

    /// Consume the entry for a satisfied (or nacked) Interest.
    pub fn remove(&mut self, name: &Name) -> Option<PitEntry> {
        let removed = self.entries.remove(name);
        if removed.is_some() {
            self.metrics.pit_satisfied.increment();
        }
        self.metrics.pit_size.set(self.entries.len() as u64);
        removed
    }

    pub fn touch(&mut self, name: &Name) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.timestamp = Instant::now();
        }
    }

    /// Remove entries older than the TTL and return them so the caller
    /// can answer each incoming face with NACK(NO_CONTENT).
    pub fn age(&mut self, now: Instant) -> Vec<PitEntry> {
        let ttl = self.ttl;
        let expired: Vec<Name> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.timestamp) > ttl)
            .map(|(n, _)| n.clone())
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for name in expired {
            if let Some(entry) = self.entries.remove(&name) {
                removed.push(entry);
            }
        }
        self.metrics.pit_expired.add(removed.len() as u64);
        self.metrics.pit_size.set(self.entries.len() as u64);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedPit = Arc<Mutex<Pit>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn pit(ttl_secs: u64) -> Pit {
        Pit::new(
            Duration::from_secs(ttl_secs),
            Arc::new(ForwarderMetrics::new()),
        )
    }

    #[test]
    fn aggregation_keeps_one_entry() {
        let mut pit = pit(4);
        let name = Name::from_string("/x");
        pit.add_interest(name.clone(), FaceId(2), FaceId(9), false);
        pit.append_incoming(&name, FaceId(3));
        assert_eq!(pit.len(), 1);
        let entry = pit.find(&name).unwrap();
        assert_eq!(
            entry.incoming.iter().copied().collect::<Vec<_>>(),
            vec![FaceId(2), FaceId(3)]
        );
        assert_eq!(entry.outgoing.iter().copied().collect::<Vec<_>>(), vec![FaceId(9)]);
        assert!(!entry.incoming.is_empty());
    }

    #[test]
    fn satisfaction_consumes_entry() {
        let mut pit = pit(4);
        let name = Name::from_string("/x");
        pit.add_interest(name.clone(), FaceId(2), FaceId(9), false);
        let entry = pit.remove(&name).unwrap();
        assert!(entry.incoming.contains(&FaceId(2)));
        assert!(pit.is_empty());
        assert!(pit.remove(&name).is_none());
    }

    #[test]
    fn aging_returns_expired_entries() {
        let mut pit = pit(0);
        pit.add_interest(Name::from_string("/x"), FaceId(2), FaceId(9), false);
        pit.add_interest(Name::from_string("/y"), FaceId(3), FaceId(9), true);
        std::thread::sleep(Duration::from_millis(5));
        let mut expired = pit.age(Instant::now());
        expired.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(expired.len(), 2);
        assert_eq!(expired[0].name, Name::from_string("/x"));
        assert!(expired[1].from_local);
        assert!(pit.is_empty());
    }

    #[test]
    fn touch_defers_aging() {
        let mut pit = pit(1);
        let name = Name::from_string("/x");
        pit.add_interest(name.clone(), FaceId(2), FaceId(9), false);
        pit.touch(&name);
        assert!(pit.age(Instant::now()).is_empty());
        assert_eq!(pit.len(), 1);
    }
}
