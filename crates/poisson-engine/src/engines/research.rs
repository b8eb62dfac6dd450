//! Research engine — browse mechanics restricted to privacy/legal/
//! government/academic categories. Opt-in only.

use super::{weighted_site, Engine, EngineContext};
use crate::topic::RESEARCH_CATEGORIES;
use poisson_core::{EngineKind, Task, TaskKind};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const EXPECTED_BYTES: u64 = 1_200_000;

pub struct ResearchEngine;

impl Engine for ResearchEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Research
    }

    fn produce_task(&self, ctx: &EngineContext<'_>, rng: &mut ChaCha8Rng) -> Option<Task> {
        // Use the session topic when it is already a research category,
        // otherwise redirect to whichever research category has sites.
        let category = if RESEARCH_CATEGORIES.contains(&ctx.topic.category.as_str()) {
            ctx.topic.category.clone()
        } else {
            RESEARCH_CATEGORIES
                .iter()
                .find(|c| ctx.tables.has_category(c))?
                .to_string()
        };
        let sites = ctx.tables.sites.get(&category)?;
        let site = weighted_site(sites, rng)?;
        Some(Task {
            engine: EngineKind::Research,
            url: site.url.clone(),
            kind: TaskKind::Page,
            expected_bytes: EXPECTED_BYTES,
            post_delay_ms: rng.gen_range(1000..5000),
        })
    }
}
