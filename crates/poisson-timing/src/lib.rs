//! Poisson Timing - inhomogeneous Poisson arrivals and intra-session pacing

pub mod intensity;
pub mod kernel;
pub mod markov;
pub mod rng;

pub use intensity::{DiurnalCurve, IntensityProfile, RateFn};
pub use kernel::{EventTag, FiredEvent, ThinningSampler, TimingKernel};
pub use markov::{BrowseState, MarkovChain};
pub use rng::RngSeed;
