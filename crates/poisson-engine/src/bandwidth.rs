//! Bandwidth governor — rolling-window byte ledger with admission control
//!
//! A sliding window (not a daily bucket) so the budget cannot be burned
//! early and leave the line silent at night. Admission never blocks: it
//! admits or rejects against the current ledger total plus an EWMA-adjusted
//! per-engine estimate.

use poisson_core::EngineKind;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);
const EWMA_ALPHA: f64 = 0.2;

/// Coarse starting estimates per engine, refined by observation.
fn base_estimate(engine: EngineKind) -> f64 {
    match engine {
        EngineKind::Browse => 1_500_000.0,
        EngineKind::Search => 300_000.0,
        EngineKind::Dns => 1_000.0,
        EngineKind::Research => 1_200_000.0,
        EngineKind::Tor => 800_000.0,
        EngineKind::Adclick => 900_000.0,
    }
}

struct Ledger {
    samples: VecDeque<(Instant, u64)>,
    estimates: HashMap<EngineKind, f64>,
}

pub struct BandwidthGovernor {
    window: Duration,
    cap_bytes: u64,
    inner: Mutex<Ledger>,
}

impl BandwidthGovernor {
    pub fn new(cap_mb_per_window: u64, window: Duration) -> Self {
        Self {
            window,
            cap_bytes: cap_mb_per_window * 1_000_000,
            inner: Mutex::new(Ledger {
                samples: VecDeque::new(),
                estimates: HashMap::new(),
            }),
        }
    }

    pub fn cap_bytes(&self) -> u64 {
        self.cap_bytes
    }

    /// Admit or reject a candidate task. Rejection reports the current
    /// window usage for logging.
    pub fn admit(&self, engine: EngineKind) -> Result<(), u64> {
        let mut ledger = self.inner.lock().expect("ledger lock poisoned");
        let used = Self::compact(&mut ledger.samples, self.window);
        let estimate = ledger
            .estimates
            .get(&engine)
            .copied()
            .unwrap_or_else(|| base_estimate(engine));
        if used + estimate as u64 > self.cap_bytes {
            Err(used)
        } else {
            Ok(())
        }
    }

    /// Record observed bytes on task completion and fold them into the
    /// engine's EWMA estimate.
    pub fn record(&self, engine: EngineKind, bytes: u64) {
        let mut ledger = self.inner.lock().expect("ledger lock poisoned");
        ledger.samples.push_back((Instant::now(), bytes));
        let prior = ledger
            .estimates
            .get(&engine)
            .copied()
            .unwrap_or_else(|| base_estimate(engine));
        let next = prior + EWMA_ALPHA * (bytes as f64 - prior);
        ledger.estimates.insert(engine, next);
    }

    /// Total bytes inside the current window.
    pub fn used_bytes(&self) -> u64 {
        let mut ledger = self.inner.lock().expect("ledger lock poisoned");
        Self::compact(&mut ledger.samples, self.window)
    }

    pub fn estimate(&self, engine: EngineKind) -> u64 {
        let ledger = self.inner.lock().expect("ledger lock poisoned");
        ledger
            .estimates
            .get(&engine)
            .copied()
            .unwrap_or_else(|| base_estimate(engine)) as u64
    }

    /// Drop samples older than the window; returns the remaining total.
    fn compact(samples: &mut VecDeque<(Instant, u64)>, window: Duration) -> u64 {
        let now = Instant::now();
        while let Some((ts, _)) = samples.front() {
            if now.duration_since(*ts) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
        samples.iter().map(|(_, b)| *b).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_until_cap() {
        let gov = BandwidthGovernor::new(1, DEFAULT_WINDOW); // 1 MB
        assert!(gov.admit(EngineKind::Search).is_ok());
        gov.record(EngineKind::Search, 800_000);
        // 800 KB used + ~300 KB estimate busts a 1 MB cap.
        assert!(gov.admit(EngineKind::Search).is_err());
        // DNS is tiny and still fits.
        assert!(gov.admit(EngineKind::Dns).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_frees_budget() {
        let gov = BandwidthGovernor::new(1, Duration::from_secs(60));
        gov.record(EngineKind::Browse, 900_000);
        assert!(gov.admit(EngineKind::Search).is_err());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(gov.used_bytes(), 0);
        assert!(gov.admit(EngineKind::Search).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn ewma_tracks_observed_bytes() {
        let gov = BandwidthGovernor::new(100, DEFAULT_WINDOW);
        let before = gov.estimate(EngineKind::Search);
        for _ in 0..30 {
            gov.record(EngineKind::Search, 50_000);
        }
        let after = gov.estimate(EngineKind::Search);
        assert!(after < before);
        assert!((45_000..=60_000).contains(&after), "estimate {after}");
    }

    #[tokio::test(start_paused = true)]
    async fn overshoot_bounded_by_one_task() {
        let gov = BandwidthGovernor::new(5, DEFAULT_WINDOW);
        let mut total = 0u64;
        // Simulate 300 KB tasks admitted one at a time.
        while gov.admit(EngineKind::Search).is_ok() {
            gov.record(EngineKind::Search, 300_000);
            total += 300_000;
            assert!(total <= gov.cap_bytes() + 300_000);
        }
        assert!(gov.used_bytes() <= gov.cap_bytes() + 300_000);
    }
}
