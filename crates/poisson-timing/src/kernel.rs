//! Timing kernel — inhomogeneous Poisson arrivals via thinning
//!
//! `ThinningSampler` is the pure core: draw a candidate gap against the
//! dominating rate λ_max, accept with probability λ(t)/λ_max, retry
//! otherwise. `TimingKernel` wraps it in async plumbing: the schedule gate,
//! live profile updates, and cancellation.

use crate::intensity::{IntensityProfile, RateFn};
use chrono::{DateTime, Local};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Lookahead horizon for λ_max; also caps a single candidate gap so rate
/// changes are picked up on the next draw.
const LOOKAHEAD_SECS: f64 = 900.0;

/// Logical stream an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTag {
    SessionStart,
    DnsTick,
    ObsessionRefresh,
}

/// A fired event plus the λ sample that produced it, for observability.
#[derive(Clone, Debug)]
pub struct FiredEvent {
    pub tag: EventTag,
    pub at: DateTime<Local>,
    pub lambda: f64,
}

pub struct ThinningSampler<R: RateFn> {
    rate: R,
    rng: ChaCha8Rng,
}

impl<R: RateFn> ThinningSampler<R> {
    pub fn new(rate: R, rng: ChaCha8Rng) -> Self {
        Self { rate, rng }
    }

    pub fn set_rate(&mut self, rate: R) {
        self.rate = rate;
    }

    pub fn rate(&self) -> &R {
        &self.rate
    }

    /// Next accepted firing time strictly after `t`, with its λ sample.
    pub fn next_after(&mut self, mut t: DateTime<Local>) -> (DateTime<Local>, f64) {
        loop {
            let lambda_max = self.rate.lambda_max(t, LOOKAHEAD_SECS);
            if lambda_max <= f64::EPSILON {
                // Rate floor; advance and re-evaluate rather than divide by zero.
                t += chrono::Duration::seconds(60);
                continue;
            }
            let u: f64 = self.rng.gen();
            let gap = -(1.0 - u).ln() / lambda_max;
            if gap > LOOKAHEAD_SECS {
                // Candidate beyond the horizon λ_max was computed for.
                t += chrono::Duration::milliseconds((LOOKAHEAD_SECS * 1000.0) as i64);
                continue;
            }
            t += chrono::Duration::milliseconds((gap * 1000.0).round() as i64);
            let lambda = self.rate.lambda(t);
            if self.rng.gen::<f64>() * lambda_max <= lambda {
                return (t, lambda);
            }
        }
    }
}

/// Async producer of one event stream.
pub struct TimingKernel {
    tag: EventTag,
    sampler: ThinningSampler<IntensityProfile>,
    profile_rx: watch::Receiver<IntensityProfile>,
    gate_rx: watch::Receiver<bool>,
    anchor_wall: DateTime<Local>,
    anchor: tokio::time::Instant,
}

impl TimingKernel {
    pub fn new(
        tag: EventTag,
        profile_rx: watch::Receiver<IntensityProfile>,
        gate_rx: watch::Receiver<bool>,
        rng: ChaCha8Rng,
    ) -> Self {
        let profile = profile_rx.borrow().clone();
        Self {
            tag,
            sampler: ThinningSampler::new(profile, rng),
            profile_rx,
            gate_rx,
            anchor_wall: Local::now(),
            anchor: tokio::time::Instant::now(),
        }
    }

    /// Wall-clock "now" derived from the tokio clock, so paused-time tests
    /// drive the diurnal math too.
    fn now(&self) -> DateTime<Local> {
        self.anchor_wall
            + chrono::Duration::from_std(self.anchor.elapsed()).unwrap_or_default()
    }

    /// Produce the next event. Suspends while the gate is closed (no
    /// phantom events), honors in-flight draws across config changes, and
    /// returns `None` once cancelled.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<FiredEvent> {
        loop {
            // Suspend until the gate lifts.
            while !*self.gate_rx.borrow() {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    changed = self.gate_rx.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }

            // Config changes take effect on the next candidate draw.
            if self.profile_rx.has_changed().unwrap_or(false) {
                let profile = self.profile_rx.borrow_and_update().clone();
                self.sampler.set_rate(profile);
            }

            let now = self.now();
            let (fire_at, lambda) = self.sampler.next_after(now);
            let wait = (fire_at - now).to_std().unwrap_or_default();
            trace!(tag = ?self.tag, wait_secs = wait.as_secs_f64(), lambda, "kernel armed");

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }

            // Gate may have closed mid-wait; the event is discarded, not queued.
            if !*self.gate_rx.borrow() {
                continue;
            }

            return Some(FiredEvent {
                tag: self.tag,
                at: fire_at,
                lambda,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RngSeed;
    use poisson_core::Intensity;

    #[test]
    fn sampler_advances_monotonically() {
        let profile = IntensityProfile::constant(120.0);
        let mut sampler = ThinningSampler::new(profile, RngSeed(1).stream("t"));
        let mut t = Local::now();
        for _ in 0..200 {
            let (next, lambda) = sampler.next_after(t);
            assert!(next > t);
            assert!(lambda > 0.0);
            t = next;
        }
    }

    #[test]
    fn sampler_is_deterministic_under_seed() {
        let mut a = ThinningSampler::new(IntensityProfile::constant(60.0), RngSeed(9).stream("k"));
        let mut b = ThinningSampler::new(IntensityProfile::constant(60.0), RngSeed(9).stream("k"));
        let start = Local::now();
        assert_eq!(a.next_after(start).0, b.next_after(start).0);
    }

    #[test]
    fn diurnal_profile_still_fires_at_night() {
        // The quiet hours are quiet, not silent: the sampler must always
        // make progress.
        let profile = IntensityProfile::new(Intensity::Low, 3);
        let mut sampler = ThinningSampler::new(profile, RngSeed(5).stream("night"));
        let night = chrono::TimeZone::with_ymd_and_hms(&Local, 2026, 3, 10, 2, 0, 0).unwrap();
        let (next, _) = sampler.next_after(night);
        assert!(next > night);
        assert!(next - night < chrono::Duration::hours(12));
    }

    #[tokio::test(start_paused = true)]
    async fn kernel_suspends_while_gate_closed() {
        let (_profile_tx, profile_rx) = watch::channel(IntensityProfile::constant(3600.0));
        let (gate_tx, gate_rx) = watch::channel(false);
        let mut kernel = TimingKernel::new(
            EventTag::SessionStart,
            profile_rx,
            gate_rx,
            RngSeed(2).stream("gate"),
        );
        let cancel = CancellationToken::new();

        let fired = tokio::spawn(async move { kernel.next(&cancel).await });

        // A closed gate produces nothing, no matter how long we wait.
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        assert!(!fired.is_finished());

        gate_tx.send(true).unwrap();
        let event = fired.await.unwrap().expect("event after gate lift");
        assert_eq!(event.tag, EventTag::SessionStart);
    }

    #[tokio::test(start_paused = true)]
    async fn kernel_cancellation_exits_wait_promptly() {
        let (_profile_tx, profile_rx) = watch::channel(IntensityProfile::constant(1.0));
        let (_gate_tx, gate_rx) = watch::channel(true);
        let mut kernel = TimingKernel::new(
            EventTag::DnsTick,
            profile_rx,
            gate_rx,
            RngSeed(2).stream("cancel"),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(kernel.next(&cancel).await.is_none());
    }
}
