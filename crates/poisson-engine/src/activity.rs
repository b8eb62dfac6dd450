//! Activity ring — bounded FIFO of recent task records
//!
//! Single-writer discipline: every task funnels through `record`, which
//! also emits the JSON activity line (via the `activity` tracing target)
//! for operator consumption. Readers get consistent snapshots.

use chrono::{Timelike, Utc};
use poisson_core::{ActivityEntry, EngineKind, Outcome};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 256;

pub struct ActivityRing {
    inner: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl Default for ActivityRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 200, "ring capacity below spec minimum");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append one record, evicting FIFO at capacity, and emit the JSON
    /// activity line.
    pub fn record(
        &self,
        engine: EngineKind,
        detail: impl Into<String>,
        bytes: u64,
        outcome: Outcome,
        url: &str,
        persona: &str,
        session_id: &str,
    ) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            engine,
            detail: detail.into(),
            bytes,
            outcome,
        };
        tracing::info!(
            target: "activity",
            ts = %entry.timestamp.to_rfc3339(),
            engine = engine.as_str(),
            url,
            bytes,
            outcome = outcome.as_str(),
            persona,
            session_id,
        );
        let mut ring = self.inner.lock().expect("activity lock poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("activity lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent `count` entries, newest last.
    pub fn tail(&self, count: usize) -> Vec<ActivityEntry> {
        let ring = self.inner.lock().expect("activity lock poisoned");
        ring.iter().rev().take(count).rev().cloned().collect()
    }

    pub fn count_outcome(&self, outcome: Outcome) -> usize {
        let ring = self.inner.lock().expect("activity lock poisoned");
        ring.iter().filter(|e| e.outcome == outcome).count()
    }

    /// 24-bucket per-engine histogram over the entries currently in the
    /// ring, bucketed by UTC hour.
    pub fn chart(&self) -> serde_json::Value {
        let ring = self.inner.lock().expect("activity lock poisoned");
        let mut buckets: std::collections::HashMap<EngineKind, [u64; 24]> =
            std::collections::HashMap::new();
        for entry in ring.iter() {
            let hour = entry.timestamp.hour() as usize;
            buckets.entry(entry.engine).or_insert([0; 24])[hour] += 1;
        }
        let per_engine: serde_json::Map<String, serde_json::Value> = buckets
            .into_iter()
            .map(|(engine, counts)| {
                (
                    engine.as_str().to_string(),
                    serde_json::json!(counts.to_vec()),
                )
            })
            .collect();
        serde_json::json!({ "buckets": 24, "engines": per_engine })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(ring: &ActivityRing, n: usize) {
        for i in 0..n {
            ring.record(
                EngineKind::Search,
                format!("entry {i}"),
                10,
                Outcome::Ok,
                "https://example.org",
                "p",
                "s",
            );
        }
    }

    #[test]
    fn ring_bounded_fifo() {
        let ring = ActivityRing::new(200);
        push(&ring, 450);
        assert_eq!(ring.len(), 200);
        let tail = ring.tail(200);
        assert_eq!(tail.first().unwrap().detail, "entry 250");
        assert_eq!(tail.last().unwrap().detail, "entry 449");
    }

    #[test]
    fn tail_smaller_than_ring() {
        let ring = ActivityRing::new(200);
        push(&ring, 10);
        let tail = ring.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.last().unwrap().detail, "entry 9");
    }

    #[test]
    fn outcome_counts() {
        let ring = ActivityRing::new(200);
        push(&ring, 4);
        ring.record(
            EngineKind::Browse,
            "rejected",
            0,
            Outcome::Skipped,
            "",
            "p",
            "s",
        );
        assert_eq!(ring.count_outcome(Outcome::Ok), 4);
        assert_eq!(ring.count_outcome(Outcome::Skipped), 1);
    }

    #[test]
    fn chart_has_24_buckets() {
        let ring = ActivityRing::new(200);
        push(&ring, 5);
        let chart = ring.chart();
        assert_eq!(chart["buckets"], 24);
        let search = chart["engines"]["search"].as_array().unwrap();
        assert_eq!(search.len(), 24);
        let total: u64 = search.iter().map(|v| v.as_u64().unwrap()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    #[should_panic]
    fn capacity_below_minimum_rejected() {
        ActivityRing::new(100);
    }
}
