//! Ad-click engine — visits ad-bearing pages and clicks one qualifying ad
//!
//! Opt-in only. Task production mirrors browse; the session runner issues
//! the actual `click_ad` driver call for tasks carrying this engine.

use super::{weighted_site, Engine, EngineContext};
use poisson_core::{EngineKind, Task, TaskKind};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const EXPECTED_BYTES: u64 = 900_000;

/// Categories that reliably carry ad inventory.
const AD_BEARING: [&str; 4] = ["shopping", "news_left", "news_right", "entertainment"];

pub struct AdClickEngine;

impl Engine for AdClickEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Adclick
    }

    fn produce_task(&self, ctx: &EngineContext<'_>, rng: &mut ChaCha8Rng) -> Option<Task> {
        let category = if AD_BEARING.contains(&ctx.topic.category.as_str()) {
            ctx.topic.category.as_str()
        } else {
            AD_BEARING.iter().find(|c| ctx.tables.has_category(c))?
        };
        let sites = ctx.tables.sites.get(category)?;
        let site = weighted_site(sites, rng)?;
        Some(Task {
            engine: EngineKind::Adclick,
            url: site.url.clone(),
            kind: TaskKind::Page,
            expected_bytes: EXPECTED_BYTES,
            post_delay_ms: rng.gen_range(1500..6000),
        })
    }
}
