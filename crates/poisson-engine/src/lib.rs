//! Poisson Engine - session machinery, engines, and the scheduler

pub mod activity;
pub mod bandwidth;
pub mod driver;
pub mod engines;
pub mod ext;
pub mod persona;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod topic;

pub use activity::ActivityRing;
pub use bandwidth::BandwidthGovernor;
pub use driver::{DriverPool, PageDriver, PageResult, StubPool};
pub use engines::{Engine, EngineSet};
pub use ext::ExtBridge;
pub use persona::PersonaRegistry;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use session::SessionManager;
pub use stats::DayStats;
pub use topic::TopicModel;
