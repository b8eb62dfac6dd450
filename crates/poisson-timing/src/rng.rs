//! Seeded RNG substreams
//!
//! All randomness flows through named substreams derived from one master
//! seed, so tests can pin the whole process deterministically while the
//! kernel, topic model, persona registry, and dispatcher stay decorrelated.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hash::{Hash, Hasher};

#[derive(Clone, Copy, Debug)]
pub struct RngSeed(pub u64);

impl RngSeed {
    pub fn from_entropy() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// Derive an independent substream for a named consumer.
    pub fn stream(&self, label: &str) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0 ^ hash_label(label))
    }
}

pub fn hash_label(s: &str) -> u64 {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}
