//! DNS engine — lightweight resolver noise, independent of browser slots

use super::{host_of, Engine, EngineContext};
use poisson_core::{EngineKind, Task, TaskKind};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const EXPECTED_BYTES: u64 = 1_000;

/// Infrastructure hosts mixed into the pool so lookups are not purely
/// site-list shaped.
const MIXED_POOL: [&str; 8] = [
    "cdn.jsdelivr.net",
    "fonts.googleapis.com",
    "ajax.googleapis.com",
    "cdnjs.cloudflare.com",
    "static.cloudflareinsights.com",
    "ocsp.digicert.com",
    "update.googleapis.com",
    "time.cloudflare.com",
];

pub struct DnsEngine;

impl Engine for DnsEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Dns
    }

    fn requires_browser(&self) -> bool {
        false
    }

    fn produce_task(&self, ctx: &EngineContext<'_>, rng: &mut ChaCha8Rng) -> Option<Task> {
        let site_hosts: Vec<&str> = ctx
            .tables
            .sites
            .values()
            .flatten()
            .map(|s| host_of(&s.url))
            .collect();
        let pool_len = site_hosts.len() + MIXED_POOL.len();
        if pool_len == 0 {
            return None;
        }
        let idx = rng.gen_range(0..pool_len);
        let host = site_hosts
            .get(idx)
            .copied()
            .unwrap_or_else(|| MIXED_POOL[idx - site_hosts.len()]);
        Some(Task {
            engine: EngineKind::Dns,
            url: host.to_string(),
            kind: TaskKind::Dns,
            expected_bytes: EXPECTED_BYTES,
            post_delay_ms: rng.gen_range(0..500),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{test_persona, test_tables, test_topic};
    use super::*;
    use poisson_timing::RngSeed;

    #[test]
    fn draws_from_mixed_pool() {
        let tables = test_tables();
        let topic = test_topic("news_left");
        let persona = test_persona();
        let ctx = EngineContext {
            tables: &tables,
            topic: &topic,
            persona: &persona,
        };
        let mut rng = RngSeed(1).stream("dns");
        let mut from_sites = false;
        let mut from_infra = false;
        for _ in 0..200 {
            let task = DnsEngine.produce_task(&ctx, &mut rng).unwrap();
            assert_eq!(task.kind, TaskKind::Dns);
            assert!(!task.url.contains('/'));
            if task.url.starts_with("example") || task.url.starts_with("privacy") {
                from_sites = true;
            } else {
                from_infra = true;
            }
        }
        assert!(from_sites && from_infra, "pool not mixed");
    }

    #[test]
    fn works_without_site_tables() {
        let tables = poisson_core::DataTables::default();
        let topic = test_topic("any");
        let persona = test_persona();
        let ctx = EngineContext {
            tables: &tables,
            topic: &topic,
            persona: &persona,
        };
        let mut rng = RngSeed(1).stream("dns");
        let task = DnsEngine.produce_task(&ctx, &mut rng).unwrap();
        assert!(MIXED_POOL.contains(&task.url.as_str()));
    }
}
