//! Engine dispatch — the polymorphic capability set behind every task
//!
//! Each engine translates a topic+persona into a concrete task. The set
//! tracks per-engine enablement, weight, and stats, and draws engines with
//! recent-share damping so no single engine collapses the mix.

pub mod adclick;
pub mod browse;
pub mod dns;
pub mod research;
pub mod search;
pub mod tor;

use poisson_core::{Config, DataTables, EngineKind, Outcome, Persona, Task, TopicDraw};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Window over which "recent share" damping is computed.
const RECENT_WINDOW: Duration = Duration::from_secs(600);

pub struct EngineContext<'a> {
    pub tables: &'a DataTables,
    pub topic: &'a TopicDraw,
    pub persona: &'a Persona,
}

pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Whether running a task occupies a browser session slot.
    fn requires_browser(&self) -> bool {
        true
    }

    /// Translate the draw into a concrete task, or bow out (`None`) when
    /// the engine has nothing sensible to do with it.
    fn produce_task(&self, ctx: &EngineContext<'_>, rng: &mut ChaCha8Rng) -> Option<Task>;

    /// Engine-local hook on task completion; stats bookkeeping lives in
    /// the set.
    fn on_complete(&self, _task: &Task, _outcome: Outcome, _bytes: u64) {}
}

#[derive(Default)]
pub struct EngineStats {
    pub requests: AtomicU64,
    pub errors: AtomicU64,
    pub skipped: AtomicU64,
    pub bytes: AtomicU64,
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub weight: f64,
    pub requires_browser: bool,
    pub requests: u64,
    pub errors: u64,
    pub skipped: u64,
    pub bytes: u64,
}

struct EngineEntry {
    engine: Arc<dyn Engine>,
    enabled: AtomicBool,
    weight: f64,
    stats: EngineStats,
    recent: Mutex<VecDeque<Instant>>,
}

pub struct EngineSet {
    entries: Vec<EngineEntry>,
}

impl EngineSet {
    /// Register the six engines with enablement from config and the
    /// default weight table.
    pub fn standard(config: &Config, tor_status: watch::Receiver<poisson_core::TorStatus>) -> Self {
        let mut set = Self {
            entries: Vec::new(),
        };
        set.register(Arc::new(search::SearchEngine), config, 1.0);
        set.register(Arc::new(browse::BrowseEngine), config, 1.2);
        set.register(Arc::new(dns::DnsEngine), config, 0.8);
        set.register(Arc::new(research::ResearchEngine), config, 0.5);
        set.register(Arc::new(tor::TorEngine::new(tor_status)), config, 0.3);
        set.register(Arc::new(adclick::AdClickEngine), config, 0.2);
        set
    }

    fn register(&mut self, engine: Arc<dyn Engine>, config: &Config, weight: f64) {
        let enabled = config.engine_enabled(engine.kind());
        self.entries.push(EngineEntry {
            engine,
            enabled: AtomicBool::new(enabled),
            weight,
            stats: EngineStats::default(),
            recent: Mutex::new(VecDeque::new()),
        });
    }

    fn entry(&self, kind: EngineKind) -> Option<&EngineEntry> {
        self.entries.iter().find(|e| e.engine.kind() == kind)
    }

    pub fn is_enabled(&self, kind: EngineKind) -> bool {
        self.entry(kind)
            .map(|e| e.enabled.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Flip enablement; returns the new state.
    pub fn toggle(&self, kind: EngineKind) -> bool {
        let entry = self.entry(kind).expect("all engines registered");
        let new = !entry.enabled.load(Ordering::Relaxed);
        entry.enabled.store(new, Ordering::Relaxed);
        tracing::info!(engine = kind.as_str(), enabled = new, "engine toggled");
        new
    }

    pub fn set_enabled(&self, kind: EngineKind, enabled: bool) {
        let entry = self.entry(kind).expect("all engines registered");
        entry.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Draw an engine from the enabled set, weighted by
    /// `weight x (1 - recent_share)`. Browser-bound engines are only
    /// eligible when a session slot is free.
    pub fn pick(&self, rng: &mut ChaCha8Rng, browser_slot_free: bool) -> Option<EngineKind> {
        let now = Instant::now();
        let mut total_recent = 0usize;
        let recents: Vec<usize> = self
            .entries
            .iter()
            .map(|e| {
                let mut recent = e.recent.lock().expect("recent lock poisoned");
                while let Some(ts) = recent.front() {
                    if now.duration_since(*ts) > RECENT_WINDOW {
                        recent.pop_front();
                    } else {
                        break;
                    }
                }
                total_recent += recent.len();
                recent.len()
            })
            .collect();

        let mut candidates = Vec::new();
        let mut weights = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.enabled.load(Ordering::Relaxed) {
                continue;
            }
            if entry.engine.requires_browser() && !browser_slot_free {
                continue;
            }
            let share = if total_recent == 0 {
                0.0
            } else {
                recents[i] as f64 / total_recent as f64
            };
            candidates.push(i);
            weights.push(entry.weight * (1.0 - share).max(0.05));
        }
        if candidates.is_empty() {
            return None;
        }

        let total: f64 = weights.iter().sum();
        let mut roll = rng.gen::<f64>() * total;
        let mut chosen = candidates[candidates.len() - 1];
        for (ci, w) in candidates.iter().zip(weights.iter()) {
            if roll < *w {
                chosen = *ci;
                break;
            }
            roll -= w;
        }

        let entry = &self.entries[chosen];
        entry
            .recent
            .lock()
            .expect("recent lock poisoned")
            .push_back(now);
        Some(entry.engine.kind())
    }

    pub fn produce(
        &self,
        kind: EngineKind,
        ctx: &EngineContext<'_>,
        rng: &mut ChaCha8Rng,
    ) -> Option<Task> {
        self.entry(kind)?.engine.produce_task(ctx, rng)
    }

    /// Fold one task outcome into stats. Governor rejects count as
    /// `skipped`, never as errors.
    pub fn on_complete(&self, task: &Task, outcome: Outcome, bytes: u64) {
        let Some(entry) = self.entry(task.engine) else {
            return;
        };
        match outcome {
            Outcome::Ok => {
                entry.stats.requests.fetch_add(1, Ordering::Relaxed);
                entry.stats.bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            Outcome::Skipped => {
                entry.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Error => {
                entry.stats.requests.fetch_add(1, Ordering::Relaxed);
                entry.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        entry.engine.on_complete(task, outcome, bytes);
    }

    pub fn requests(&self, kind: EngineKind) -> u64 {
        self.entry(kind)
            .map(|e| e.stats.requests.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn errors(&self, kind: EngineKind) -> u64 {
        self.entry(kind)
            .map(|e| e.stats.errors.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<EngineStatus> {
        self.entries
            .iter()
            .map(|e| EngineStatus {
                name: e.engine.kind().as_str(),
                enabled: e.enabled.load(Ordering::Relaxed),
                weight: e.weight,
                requires_browser: e.engine.requires_browser(),
                requests: e.stats.requests.load(Ordering::Relaxed),
                errors: e.stats.errors.load(Ordering::Relaxed),
                skipped: e.stats.skipped.load(Ordering::Relaxed),
                bytes: e.stats.bytes.load(Ordering::Relaxed),
            })
            .collect()
    }
}

/// Hostname part of a URL, for DNS work and logging.
pub(crate) fn host_of(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

/// Pick from a weighted site list.
pub(crate) fn weighted_site<'a>(
    sites: &'a [poisson_core::data::WeightedSite],
    rng: &mut ChaCha8Rng,
) -> Option<&'a poisson_core::data::WeightedSite> {
    if sites.is_empty() {
        return None;
    }
    let total: f64 = sites.iter().map(|s| s.weight).sum();
    let mut roll = rng.gen::<f64>() * total;
    for site in sites {
        if roll < site.weight {
            return Some(site);
        }
        roll -= site.weight;
    }
    sites.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use poisson_core::data::WeightedSite;
    use poisson_core::TorStatus;
    use poisson_timing::RngSeed;
    use std::collections::HashMap;

    pub(crate) fn test_tables() -> DataTables {
        let mut sites = HashMap::new();
        sites.insert(
            "news_left".to_string(),
            vec![
                WeightedSite {
                    url: "https://example.org/news".into(),
                    weight: 2.0,
                },
                WeightedSite {
                    url: "https://example.net/politics".into(),
                    weight: 1.0,
                },
            ],
        );
        sites.insert(
            "privacy_tools".to_string(),
            vec![WeightedSite {
                url: "https://privacy.example/tools".into(),
                weight: 1.0,
            }],
        );
        let mut search_terms = HashMap::new();
        search_terms.insert("news_left".to_string(), vec!["local election".to_string()]);
        DataTables {
            sites,
            search_terms,
            onion_sites: vec!["http://exampleonionv3addr.onion".into()],
            ..Default::default()
        }
    }

    pub(crate) fn test_topic(category: &str) -> TopicDraw {
        TopicDraw {
            category: category.into(),
            query_hint: Some("local election".into()),
            research_queries: None,
            from_obsession: false,
        }
    }

    pub(crate) fn test_persona() -> Persona {
        Persona {
            name: "desk".into(),
            user_agent: "ua".into(),
            viewport: (1920, 1080),
            platform: "test".into(),
            languages: vec![],
            timezone: None,
            accept_encoding: "gzip".into(),
            device_class: Default::default(),
            weight: 1.0,
            fingerprint: None,
        }
    }

    fn default_set() -> EngineSet {
        let (_tx, rx) = watch::channel(TorStatus::Disabled);
        EngineSet::standard(&Config::default(), rx)
    }

    #[test]
    fn safety_defaults_hold() {
        let set = default_set();
        assert!(set.is_enabled(EngineKind::Search));
        assert!(set.is_enabled(EngineKind::Browse));
        assert!(set.is_enabled(EngineKind::Dns));
        assert!(!set.is_enabled(EngineKind::Tor));
        assert!(!set.is_enabled(EngineKind::Research));
        assert!(!set.is_enabled(EngineKind::Adclick));
    }

    #[test]
    fn toggle_round_trip() {
        let set = default_set();
        assert!(set.toggle(EngineKind::Tor));
        assert!(set.is_enabled(EngineKind::Tor));
        assert!(!set.toggle(EngineKind::Tor));
        assert!(!set.is_enabled(EngineKind::Tor));
    }

    #[tokio::test(start_paused = true)]
    async fn pick_skips_disabled_engines() {
        let set = default_set();
        let mut rng = RngSeed(1).stream("dispatch");
        for _ in 0..200 {
            let kind = set.pick(&mut rng, true).unwrap();
            assert!(kind.allowed_by_safety_default(), "picked disabled {kind}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pick_without_slot_only_dns() {
        let set = default_set();
        let mut rng = RngSeed(1).stream("dispatch");
        for _ in 0..50 {
            assert_eq!(set.pick(&mut rng, false), Some(EngineKind::Dns));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recent_share_damps_mode_collapse() {
        let set = default_set();
        let mut rng = RngSeed(5).stream("dispatch");
        let mut counts: HashMap<EngineKind, usize> = HashMap::new();
        for _ in 0..600 {
            *counts.entry(set.pick(&mut rng, true).unwrap()).or_default() += 1;
        }
        // All three default engines stay in the mix.
        for kind in [EngineKind::Search, EngineKind::Browse, EngineKind::Dns] {
            let share = counts[&kind] as f64 / 600.0;
            assert!(share > 0.15, "{kind} share {share}");
        }
    }

    #[test]
    fn stats_separate_errors_from_skips() {
        let set = default_set();
        let task = Task {
            engine: EngineKind::Search,
            url: "https://example.org".into(),
            kind: poisson_core::TaskKind::Page,
            expected_bytes: 1,
            post_delay_ms: 0,
        };
        set.on_complete(&task, Outcome::Ok, 100);
        set.on_complete(&task, Outcome::Error, 0);
        set.on_complete(&task, Outcome::Skipped, 0);
        let status = set
            .snapshot()
            .into_iter()
            .find(|s| s.name == "search")
            .unwrap();
        assert_eq!(status.requests, 2);
        assert_eq!(status.errors, 1);
        assert_eq!(status.skipped, 1);
        assert_eq!(status.bytes, 100);
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://example.org/a/b"), "example.org");
        assert_eq!(host_of("http://example.net"), "example.net");
        assert_eq!(host_of("example.com/x"), "example.com");
    }
}
