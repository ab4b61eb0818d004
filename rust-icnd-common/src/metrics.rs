//! Metrics collection for the forwarder.
//!
//! Lock-free counters and gauges that the tables and pipeline stages
//! update on their fast paths, aggregated into [`ForwarderMetrics`].
//! A [`MetricsSnapshot`] gives a consistent point-in-time view of the
//! headline numbers for status output.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing event count.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.value()))
    }
}

/// Instantaneous level, e.g. the size of a table.
///
/// Decrements saturate at zero: a late decrement after a table was
/// cleared must not wrap the reported size around.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        let g = Gauge::new();
        g.set(self.value());
        g
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate metrics for the forwarder
 * ---------------------------------------------------------------- */

#[derive(Debug, Default, Clone)]
pub struct ForwarderMetrics {
    // Packet processing metrics
    pub interests_received: Counter,
    pub interests_forwarded: Counter,
    /// Interests aggregated onto an existing PIT entry
    pub interests_suppressed: Counter,
    pub content_received: Counter,
    pub content_delivered: Counter,
    pub unsolicited_content: Counter,
    pub nacks_received: Counter,
    pub nacks_sent: Counter,
    pub packets_dropped: Counter,

    // Content store metrics
    pub cs_hits: Counter,
    pub cs_misses: Counter,
    pub cs_inserts: Counter,
    pub cs_evictions: Counter,
    pub cs_expired: Counter,
    pub cs_size: Gauge,

    // PIT metrics
    pub pit_inserts: Counter,
    pub pit_satisfied: Counter,
    pub pit_expired: Counter,
    pub pit_size: Gauge,

    // FIB metrics
    pub fib_hits: Counter,
    pub fib_misses: Counter,
    pub fib_size: Gauge,

    // Transport metrics
    pub bytes_received: Counter,
    pub bytes_sent: Counter,
}

impl ForwarderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time view of the headline numbers.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            interests_received: self.interests_received.value(),
            interests_forwarded: self.interests_forwarded.value(),
            interests_suppressed: self.interests_suppressed.value(),
            content_delivered: self.content_delivered.value(),
            nacks_sent: self.nacks_sent.value(),
            cs_hits: self.cs_hits.value(),
            cs_size: self.cs_size.value(),
            pit_size: self.pit_size.value(),
            fib_size: self.fib_size.value(),
        }
    }
}

/// Plain-value summary of a [`ForwarderMetrics`], safe to hold across
/// await points and cheap to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub interests_received: u64,
    pub interests_forwarded: u64,
    pub interests_suppressed: u64,
    pub content_delivered: u64,
    pub nacks_sent: u64,
    pub cs_hits: u64,
    pub cs_size: u64,
    pub pit_size: u64,
    pub fib_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basics() {
        let c = Counter::new();
        c.increment();
        c.add(4);
        assert_eq!(c.value(), 5);
        let copy = c.clone();
        c.reset();
        assert_eq!(c.value(), 0);
        assert_eq!(copy.value(), 5);
    }

    #[test]
    fn gauge_decrement_saturates_at_zero() {
        let g = Gauge::new();
        g.set(1);
        g.decrement();
        g.decrement();
        assert_eq!(g.value(), 0);
        g.increment();
        assert_eq!(g.value(), 1);
    }

    #[test]
    fn snapshot_reflects_current_values() {
        let metrics = ForwarderMetrics::new();
        metrics.interests_received.add(3);
        metrics.cs_hits.increment();
        metrics.pit_size.set(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.interests_received, 3);
        assert_eq!(snapshot.cs_hits, 1);
        assert_eq!(snapshot.pit_size, 2);
        assert_eq!(snapshot.nacks_sent, 0);

        // the snapshot is a copy, later updates don't show through
        metrics.interests_received.increment();
        assert_eq!(snapshot.interests_received, 3);
    }
}
