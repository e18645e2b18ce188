//! Concurrency-safe mapping from flow identity to its sample window.
//!
//! The table is the single piece of state shared by the ingest loop, the
//! expiry sweeper and the HTTP exporter. One `RwLock` around the whole map
//! is plenty at the flow counts pping produces; every operation is a short
//! critical section bounded by the number of live flows.
//!
//! The exporter renders its gauge series straight from [`FlowTable::snapshot`],
//! so a series exists exactly as long as its flow does: inserting a flow
//! creates the series, sweeping it removes the series, and nothing can drift
//! out of sync in between.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::parse::FlowKey;
use crate::samples::FlowSamples;

/// One row of a table snapshot: a flow and its current window median.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowMedian {
    pub key: FlowKey,
    pub median_ms: f64,
}

/// Shared map of per-flow sample windows.
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: RwLock<BTreeMap<FlowKey, FlowSamples>>,
}

impl FlowTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one RTT sample to a flow, creating its tracker on first sight,
    /// and return the flow's new median.
    ///
    /// Runs under the write lock, so the append can never interleave with a
    /// concurrent removal of the same key or a torn snapshot read.
    pub fn record(&self, key: FlowKey, rtt_ms: f64) -> f64 {
        let mut flows = self.flows.write();
        let samples = flows.entry(key).or_insert_with(FlowSamples::new);
        samples.append(rtt_ms);
        samples.median()
    }

    /// Consistent view of every flow's current median, in key order.
    pub fn snapshot(&self) -> Vec<FlowMedian> {
        self.flows
            .read()
            .iter()
            .map(|(key, samples)| FlowMedian {
                key: key.clone(),
                median_ms: samples.median(),
            })
            .collect()
    }

    /// Remove a flow. Returns whether it existed; removing an absent key is
    /// a no-op.
    pub fn remove(&self, key: &FlowKey) -> bool {
        self.flows.write().remove(key).is_some()
    }

    /// Remove every flow idle for longer than `idle_timeout` and return the
    /// removed keys.
    ///
    /// `now` is captured once at sweep time. Candidates are collected from a
    /// read-locked snapshot first, then re-checked under the write lock, so
    /// a flow that receives a sample between the two phases is spared.
    pub fn sweep_expired(&self, idle_timeout: Duration) -> Vec<FlowKey> {
        let now = Instant::now();

        let candidates: Vec<FlowKey> = self
            .flows
            .read()
            .iter()
            .filter(|(_, samples)| expired(samples, now, idle_timeout))
            .map(|(key, _)| key.clone())
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let mut flows = self.flows.write();
        let mut removed = Vec::with_capacity(candidates.len());
        for key in candidates {
            let still_idle = flows
                .get(&key)
                .is_some_and(|samples| expired(samples, now, idle_timeout));
            if still_idle {
                flows.remove(&key);
                removed.push(key);
            }
        }
        removed
    }

    /// Number of live flows.
    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    /// True if no flows are tracked.
    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }
}

fn expired(samples: &FlowSamples, now: Instant, idle_timeout: Duration) -> bool {
    now.duration_since(samples.last_updated()) > idle_timeout
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(src: &str, dst: &str, port: &str) -> FlowKey {
        FlowKey {
            src_ip: src.to_string(),
            dst_ip: dst.to_string(),
            dst_port: port.to_string(),
        }
    }

    #[test]
    fn record_creates_flow_on_first_sample() {
        let table = FlowTable::new();
        assert!(table.is_empty());

        let median = table.record(key("10.0.0.254", "100.200.3.38", "9000"), 1.452);
        assert_eq!(median, 1.452);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn record_reuses_existing_tracker() {
        let table = FlowTable::new();
        let k = key("10.0.0.254", "100.200.3.38", "9000");

        table.record(k.clone(), 1.0);
        table.record(k.clone(), 3.0);
        let median = table.record(k, 2.0);

        assert_eq!(median, 2.0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn snapshot_reports_all_flows_in_key_order() {
        let table = FlowTable::new();
        table.record(key("10.0.0.2", "1.1.1.1", "53"), 4.0);
        table.record(key("10.0.0.1", "1.1.1.1", "53"), 2.0);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key.src_ip, "10.0.0.1");
        assert_eq!(snapshot[0].median_ms, 2.0);
        assert_eq!(snapshot[1].key.src_ip, "10.0.0.2");
        assert_eq!(snapshot[1].median_ms, 4.0);
    }

    #[test]
    fn snapshot_of_empty_table_is_empty() {
        assert!(FlowTable::new().snapshot().is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let table = FlowTable::new();
        let k = key("10.0.0.1", "1.1.1.1", "53");
        table.record(k.clone(), 1.0);

        assert!(table.remove(&k));
        assert!(!table.remove(&k));
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_removes_idle_flows() {
        let table = FlowTable::new();
        let k = key("10.0.0.1", "1.1.1.1", "53");
        table.record(k.clone(), 1.0);

        std::thread::sleep(Duration::from_millis(5));

        let removed = table.sweep_expired(Duration::ZERO);
        assert_eq!(removed, vec![k]);
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_spares_recently_updated_flows() {
        let table = FlowTable::new();
        table.record(key("10.0.0.1", "1.1.1.1", "53"), 1.0);

        let removed = table.sweep_expired(Duration::from_secs(300));
        assert!(removed.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_only_removes_the_idle_subset() {
        let table = FlowTable::new();
        let stale = key("10.0.0.1", "1.1.1.1", "53");
        let fresh = key("10.0.0.2", "8.8.8.8", "443");

        table.record(stale.clone(), 1.0);
        std::thread::sleep(Duration::from_millis(20));
        table.record(fresh.clone(), 2.0);

        let removed = table.sweep_expired(Duration::from_millis(10));
        assert_eq!(removed, vec![stale]);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key, fresh);
    }

    #[test]
    fn recreation_after_sweep_starts_a_fresh_window() {
        let table = FlowTable::new();
        let k = key("10.0.0.1", "1.1.1.1", "53");

        table.record(k.clone(), 100.0);
        std::thread::sleep(Duration::from_millis(5));
        table.sweep_expired(Duration::ZERO);

        // First sample after re-creation is its own median.
        assert_eq!(table.record(k, 1.0), 1.0);
    }

    #[test]
    fn concurrent_records_do_not_lose_samples() {
        use std::thread;

        let table = Arc::new(FlowTable::new());
        let mut handles = vec![];

        for t in 0..4 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    table.record(key("10.0.0.1", "1.1.1.1", &t.to_string()), i as f64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // One flow per thread, each with a full window.
        assert_eq!(table.len(), 4);
        for row in table.snapshot() {
            // Last 20 of 0..50 is 30..=49, median 39.5.
            assert_eq!(row.median_ms, 39.5);
        }
    }
}
