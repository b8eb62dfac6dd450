//! Search engine — weighted rotation across the big four hosts

use super::{Engine, EngineContext};
use poisson_core::{EngineKind, Task, TaskKind};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const HOSTS: [(&str, f64); 4] = [
    ("https://www.google.com/search?q=", 0.55),
    ("https://www.bing.com/search?q=", 0.20),
    ("https://duckduckgo.com/?q=", 0.15),
    ("https://search.yahoo.com/search?p=", 0.10),
];

const EXPECTED_BYTES: u64 = 300_000;

pub struct SearchEngine;

impl Engine for SearchEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Search
    }

    fn produce_task(&self, ctx: &EngineContext<'_>, rng: &mut ChaCha8Rng) -> Option<Task> {
        let query = ctx
            .topic
            .query_hint
            .clone()
            .or_else(|| {
                ctx.tables
                    .search_terms
                    .get(&ctx.topic.category)
                    .filter(|t| !t.is_empty())
                    .map(|t| t[rng.gen_range(0..t.len())].clone())
            })
            .unwrap_or_else(|| ctx.topic.category.replace('_', " "));

        let host = pick_host(rng);
        Some(Task {
            engine: EngineKind::Search,
            url: format!("{host}{}", encode_query(&query)),
            kind: TaskKind::Page,
            expected_bytes: EXPECTED_BYTES,
            post_delay_ms: rng.gen_range(400..2500),
        })
    }
}

fn pick_host(rng: &mut ChaCha8Rng) -> &'static str {
    let mut roll: f64 = rng.gen();
    for (host, weight) in HOSTS {
        if roll < weight {
            return host;
        }
        roll -= weight;
    }
    HOSTS[0].0
}

/// Minimal query-string encoding; the wordlists are plain ASCII phrases.
fn encode_query(q: &str) -> String {
    q.trim()
        .chars()
        .map(|c| if c == ' ' { '+' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::tests::{test_persona, test_tables, test_topic};
    use super::*;
    use poisson_timing::RngSeed;

    #[test]
    fn builds_query_url_from_hint() {
        let tables = test_tables();
        let topic = test_topic("news_left");
        let persona = test_persona();
        let ctx = EngineContext {
            tables: &tables,
            topic: &topic,
            persona: &persona,
        };
        let mut rng = RngSeed(1).stream("search");
        let task = SearchEngine.produce_task(&ctx, &mut rng).unwrap();
        assert!(task.url.contains("local+election"), "url {}", task.url);
        assert_eq!(task.expected_bytes, 300_000);
        assert_eq!(task.kind, TaskKind::Page);
    }

    #[test]
    fn falls_back_to_category_without_hint() {
        let tables = test_tables();
        let mut topic = test_topic("privacy_tools");
        topic.query_hint = None;
        let persona = test_persona();
        let ctx = EngineContext {
            tables: &tables,
            topic: &topic,
            persona: &persona,
        };
        let mut rng = RngSeed(2).stream("search");
        let task = SearchEngine.produce_task(&ctx, &mut rng).unwrap();
        assert!(task.url.contains("privacy+tools"), "url {}", task.url);
    }

    #[test]
    fn host_rotation_covers_all_hosts() {
        let mut rng = RngSeed(3).stream("search");
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(pick_host(&mut rng));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn query_encoding_strips_oddities() {
        assert_eq!(encode_query("foo bar"), "foo+bar");
        assert_eq!(encode_query("a&b=c"), "abc");
    }
}
