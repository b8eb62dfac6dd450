//! Topic and obsession model
//!
//! Draws a category per session by weight, biased by at most one live
//! "obsession" — a multi-hour topical streak modeling real human curiosity.

use chrono::{Duration as ChronoDuration, Utc};
use poisson_core::{DataTables, Obsession, TopicDraw};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution};
use std::sync::Mutex;
use tracing::{debug, info};

/// Categories only drawn when the research engine is enabled.
pub const RESEARCH_CATEGORIES: [&str; 4] = ["privacy_tools", "legal", "government", "academic"];

const RESEARCH_RUN_PROBABILITY: f64 = 0.05;
const OBSESSION_MIN_HOURS: i64 = 6;
const OBSESSION_MAX_HOURS: i64 = 72;

struct TopicState {
    obsession: Option<Obsession>,
    rng: ChaCha8Rng,
}

pub struct TopicModel {
    state: Mutex<TopicState>,
    obsession_probability: f64,
}

impl TopicModel {
    pub fn new(obsession_probability: f64, rng: ChaCha8Rng) -> Self {
        Self {
            state: Mutex::new(TopicState {
                obsession: None,
                rng,
            }),
            obsession_probability,
        }
    }

    /// Current obsession, if unexpired.
    pub fn obsession(&self) -> Option<Obsession> {
        let state = self.state.lock().expect("topic lock poisoned");
        state
            .obsession
            .clone()
            .filter(|o| o.is_live(Utc::now()))
    }

    /// Control-plane escape hatch for testing.
    pub fn clear_obsession(&self) {
        let mut state = self.state.lock().expect("topic lock poisoned");
        if state.obsession.take().is_some() {
            info!("obsession cleared");
        }
    }

    /// Drop an obsession that has run past its horizon.
    pub fn expire_stale(&self) {
        let mut state = self.state.lock().expect("topic lock poisoned");
        let now = Utc::now();
        if state
            .obsession
            .as_ref()
            .is_some_and(|o| !o.is_live(now))
        {
            debug!("obsession expired");
            state.obsession = None;
        }
    }

    /// Topic for a new session. `category_allowed` reflects engine
    /// enablement — e.g. research-only categories need the research engine.
    pub fn next_topic(
        &self,
        tables: &DataTables,
        category_allowed: &dyn Fn(&str) -> bool,
    ) -> Option<TopicDraw> {
        let mut guard = self.state.lock().expect("topic lock poisoned");
        let state = &mut *guard;
        let now = Utc::now();

        let active: Vec<(&str, f64)> = tables
            .sites
            .iter()
            .filter(|(cat, sites)| !sites.is_empty() && category_allowed(cat))
            .map(|(cat, sites)| {
                let weight: f64 = sites.iter().map(|s| s.weight).sum();
                (cat.as_str(), weight)
            })
            .collect();
        if active.is_empty() {
            return None;
        }

        // Maybe start a new obsession, replacing any existing one.
        if state.rng.gen::<f64>() < self.obsession_probability {
            let idx = weighted(&active, &mut state.rng);
            let hours = state
                .rng
                .gen_range(OBSESSION_MIN_HOURS..=OBSESSION_MAX_HOURS);
            // Skewed toward 0.4-0.8.
            let strength = Beta::new(5.0, 3.0)
                .expect("valid beta")
                .sample(&mut state.rng);
            let obsession = Obsession {
                category: active[idx].0.to_string(),
                expires_at: now + ChronoDuration::hours(hours),
                strength,
            };
            info!(category = %obsession.category, strength, hours, "obsession started");
            state.obsession = Some(obsession);
        }

        // Obsessed draw with probability `strength` while live.
        let mut from_obsession = false;
        let category = match &state.obsession {
            Some(o) if o.is_live(now) && state.rng.gen::<f64>() < o.strength => {
                from_obsession = true;
                o.category.clone()
            }
            _ => active[weighted(&active, &mut state.rng)].0.to_string(),
        };

        // Hints come from the category wordlist, topped up by the
        // specialty lists where they apply.
        let mut hint_pool: Vec<&String> = tables
            .search_terms
            .get(&category)
            .map(|t| t.iter().collect())
            .unwrap_or_default();
        if RESEARCH_CATEGORIES.contains(&category.as_str()) {
            hint_pool.extend(tables.academic_terms.iter());
        }
        if category == "shopping" {
            hint_pool.extend(tables.shopping_terms.iter());
        }
        let query_hint = if hint_pool.is_empty() {
            None
        } else {
            Some(hint_pool[state.rng.gen_range(0..hint_pool.len())].clone())
        };

        let research_queries = if state.rng.gen::<f64>() < RESEARCH_RUN_PROBABILITY {
            Some(state.rng.gen_range(3..=8))
        } else {
            None
        };

        Some(TopicDraw {
            category,
            query_hint,
            research_queries,
            from_obsession,
        })
    }
}

fn weighted(entries: &[(&str, f64)], rng: &mut ChaCha8Rng) -> usize {
    let total: f64 = entries.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen::<f64>() * total;
    for (i, (_, w)) in entries.iter().enumerate() {
        if roll < *w {
            return i;
        }
        roll -= w;
    }
    entries.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use poisson_core::data::WeightedSite;
    use poisson_timing::RngSeed;
    use std::collections::HashMap;

    fn tables(categories: &[(&str, f64)]) -> DataTables {
        let mut sites = HashMap::new();
        for (cat, weight) in categories {
            sites.insert(
                cat.to_string(),
                vec![WeightedSite {
                    url: format!("https://example.org/{cat}"),
                    weight: *weight,
                }],
            );
        }
        let mut search_terms = HashMap::new();
        search_terms.insert("news_left".to_string(), vec!["election polls".to_string()]);
        DataTables {
            sites,
            search_terms,
            ..Default::default()
        }
    }

    #[test]
    fn obsession_probability_one_locks_category() {
        let t = tables(&[("news_left", 1.0)]);
        let model = TopicModel::new(1.0, RngSeed(4).stream("topics"));
        let first = model.next_topic(&t, &|_| true).unwrap();
        assert_eq!(first.category, "news_left");
        let obs = model.obsession().expect("obsession live");
        assert_eq!(obs.category, "news_left");
        assert!((0.0..=1.0).contains(&obs.strength));
        for _ in 0..20 {
            let draw = model.next_topic(&t, &|_| true).unwrap();
            assert_eq!(draw.category, "news_left");
        }
    }

    #[test]
    fn obsession_probability_zero_never_obsesses() {
        let t = tables(&[("news_left", 1.0), ("shopping", 1.0)]);
        let model = TopicModel::new(0.0, RngSeed(4).stream("topics"));
        for _ in 0..100 {
            model.next_topic(&t, &|_| true).unwrap();
        }
        assert!(model.obsession().is_none());
    }

    #[test]
    fn clear_obsession_resets() {
        let t = tables(&[("shopping", 1.0)]);
        let model = TopicModel::new(1.0, RngSeed(4).stream("topics"));
        model.next_topic(&t, &|_| true).unwrap();
        assert!(model.obsession().is_some());
        model.clear_obsession();
        assert!(model.obsession().is_none());
    }

    #[test]
    fn disallowed_categories_not_drawn() {
        let t = tables(&[("news_left", 1.0), ("privacy_tools", 100.0)]);
        let model = TopicModel::new(0.0, RngSeed(9).stream("topics"));
        for _ in 0..200 {
            let draw = model
                .next_topic(&t, &|cat| !RESEARCH_CATEGORIES.contains(&cat))
                .unwrap();
            assert_eq!(draw.category, "news_left");
        }
    }

    #[test]
    fn no_active_categories_yields_none() {
        let t = tables(&[("news_left", 1.0)]);
        let model = TopicModel::new(0.0, RngSeed(9).stream("topics"));
        assert!(model.next_topic(&t, &|_| false).is_none());
    }

    #[test]
    fn query_hint_from_wordlist() {
        let t = tables(&[("news_left", 1.0)]);
        let model = TopicModel::new(0.0, RngSeed(2).stream("topics"));
        let draw = model.next_topic(&t, &|_| true).unwrap();
        assert_eq!(draw.query_hint.as_deref(), Some("election polls"));
    }

    #[test]
    fn weighted_draw_respects_weights() {
        let t = tables(&[("news_left", 9.0), ("shopping", 1.0)]);
        let model = TopicModel::new(0.0, RngSeed(12).stream("topics"));
        let n = 1000;
        let news = (0..n)
            .filter(|_| model.next_topic(&t, &|_| true).unwrap().category == "news_left")
            .count();
        let share = news as f64 / n as f64;
        assert!((0.85..0.95).contains(&share), "news share {share}");
    }
}
