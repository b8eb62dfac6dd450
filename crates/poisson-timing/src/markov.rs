//! Intra-session Markov chain
//!
//! Models what a human does once a page is open: skim, read, follow links,
//! refine a search, glance at an ad, go idle, leave. `leave` is absorbing.
//! Dwell times are log-normal with state-specific medians. Chains are
//! seeded from the persona+topic pair so a session replays identically in
//! tests.

use crate::rng::hash_label;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrowseState {
    Land,
    Skim,
    Read,
    FollowLink,
    SearchRefine,
    AdGlance,
    Idle,
    Leave,
}

const STATES: [BrowseState; 8] = [
    BrowseState::Land,
    BrowseState::Skim,
    BrowseState::Read,
    BrowseState::FollowLink,
    BrowseState::SearchRefine,
    BrowseState::AdGlance,
    BrowseState::Idle,
    BrowseState::Leave,
];

/// Row-stochastic transition matrix over STATES. `leave` is absorbing.
#[rustfmt::skip]
const TRANSITIONS: [[f64; 8]; 8] = [
    // land          skim  read  follow refine ad    idle  leave
    /* land   */ [0.00, 0.45, 0.30, 0.10, 0.05, 0.03, 0.02, 0.05],
    /* skim   */ [0.00, 0.15, 0.30, 0.25, 0.08, 0.04, 0.08, 0.10],
    /* read   */ [0.00, 0.10, 0.20, 0.30, 0.10, 0.03, 0.12, 0.15],
    /* follow */ [0.30, 0.30, 0.25, 0.00, 0.00, 0.03, 0.02, 0.10],
    /* refine */ [0.35, 0.25, 0.15, 0.10, 0.05, 0.00, 0.05, 0.05],
    /* ad     */ [0.10, 0.30, 0.20, 0.10, 0.05, 0.00, 0.10, 0.15],
    /* idle   */ [0.00, 0.20, 0.25, 0.15, 0.05, 0.02, 0.13, 0.20],
    /* leave  */ [0.00, 0.00, 0.00, 0.00, 0.00, 0.00, 0.00, 1.00],
];

impl BrowseState {
    fn index(self) -> usize {
        STATES.iter().position(|s| *s == self).unwrap()
    }

    /// Median dwell before the next transition.
    pub fn dwell_median(self) -> Duration {
        match self {
            BrowseState::Land => Duration::from_secs(3),
            BrowseState::Skim => Duration::from_secs(8),
            BrowseState::Read => Duration::from_secs(40),
            BrowseState::FollowLink => Duration::from_secs(2),
            BrowseState::SearchRefine => Duration::from_secs(12),
            BrowseState::AdGlance => Duration::from_secs(4),
            BrowseState::Idle => Duration::from_secs(25),
            BrowseState::Leave => Duration::ZERO,
        }
    }

    /// Hard per-state timeout: 2x the dwell median.
    pub fn dwell_cap(self) -> Duration {
        self.dwell_median() * 2
    }

    /// Whether this state drives a new page-driver call.
    pub fn loads_page(self) -> bool {
        matches!(
            self,
            BrowseState::Land | BrowseState::FollowLink | BrowseState::SearchRefine
        )
    }
}

pub struct MarkovChain {
    state: BrowseState,
    rng: ChaCha8Rng,
    steps: usize,
}

impl MarkovChain {
    /// Seed from persona+topic so a session is reproducible.
    pub fn seeded(persona: &str, topic: &str) -> Self {
        Self::with_seed(hash_label(persona) ^ hash_label(topic).rotate_left(17))
    }

    pub fn with_seed(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            state: BrowseState::Land,
            rng: ChaCha8Rng::seed_from_u64(seed),
            steps: 0,
        }
    }

    pub fn current(&self) -> BrowseState {
        self.state
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Sample the next state from the current row.
    pub fn advance(&mut self) -> BrowseState {
        let row = &TRANSITIONS[self.state.index()];
        let mut roll: f64 = self.rng.gen();
        for (i, p) in row.iter().enumerate() {
            if roll < *p {
                self.state = STATES[i];
                self.steps += 1;
                return self.state;
            }
            roll -= p;
        }
        // Floating-point remainder lands on the last nonzero column.
        self.state = BrowseState::Leave;
        self.steps += 1;
        self.state
    }

    /// Log-normal dwell for the current state, clamped to the state cap.
    pub fn dwell(&mut self) -> Duration {
        let median = self.state.dwell_median().as_secs_f64();
        if median == 0.0 {
            return Duration::ZERO;
        }
        let dist = LogNormal::new(median.ln(), 0.6).expect("valid lognormal");
        let secs: f64 = dist.sample(&mut self.rng);
        Duration::from_secs_f64(secs.min(self.state.dwell_cap().as_secs_f64()))
    }
}
