//! Browse engine — weighted site visits within the topic's category

use super::{weighted_site, Engine, EngineContext};
use poisson_core::{EngineKind, Task, TaskKind};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const EXPECTED_BYTES: u64 = 1_500_000;

pub struct BrowseEngine;

impl Engine for BrowseEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Browse
    }

    fn produce_task(&self, ctx: &EngineContext<'_>, rng: &mut ChaCha8Rng) -> Option<Task> {
        let sites = ctx.tables.sites.get(&ctx.topic.category)?;
        let site = weighted_site(sites, rng)?;
        Some(Task {
            engine: EngineKind::Browse,
            url: site.url.clone(),
            kind: TaskKind::Page,
            expected_bytes: EXPECTED_BYTES,
            post_delay_ms: rng.gen_range(800..4000),
        })
    }
}
