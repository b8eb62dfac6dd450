//! Persona registry — sticky browser identities with a coherent mix
//!
//! Sessions pin one persona for life. Across a rolling window the registry
//! keeps the empirical mix near the configured mobile/desktop ratio,
//! suppresses over-used personas, and can permanently align one desktop
//! persona with a user-reported fingerprint bundle.

use poisson_core::{DeviceClass, FingerprintBundle, Persona};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

const USAGE_WINDOW: Duration = Duration::from_secs(2 * 3600);
const MATCHED_TARGET_SHARE: f64 = 0.30;
const OVERUSE_FACTOR: f64 = 1.5;
const SUPPRESSION: f64 = 0.1;

struct RegistryState {
    pool: Vec<Arc<Persona>>,
    usage: VecDeque<(Instant, usize)>,
    matched: Option<usize>,
}

pub struct PersonaRegistry {
    state: Mutex<RegistryState>,
    mobile_ratio: f64,
    match_enabled: bool,
}

impl PersonaRegistry {
    pub fn new(personas: Vec<Persona>, match_enabled: bool) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                pool: personas.into_iter().map(Arc::new).collect(),
                usage: VecDeque::new(),
                matched: None,
            }),
            mobile_ratio: 0.30,
            match_enabled,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("persona lock poisoned").pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fingerprint_matched(&self) -> bool {
        self.state
            .lock()
            .expect("persona lock poisoned")
            .matched
            .is_some()
    }

    /// Swap in a fresh pool (data reload). The matched persona, if any, is
    /// carried over so alignment is permanent.
    pub fn replace_pool(&self, personas: Vec<Persona>) {
        let mut state = self.state.lock().expect("persona lock poisoned");
        let matched = state.matched.map(|i| state.pool[i].clone());
        state.pool = personas.into_iter().map(Arc::new).collect();
        state.usage.clear();
        state.matched = matched.map(|m| {
            state.pool.push(m);
            state.pool.len() - 1
        });
    }

    /// Pick a persona for a new session.
    pub fn pick(&self, rng: &mut ChaCha8Rng) -> Arc<Persona> {
        let mut state = self.state.lock().expect("persona lock poisoned");
        Self::prune(&mut state.usage);

        let total_recent = state.usage.len();

        // A matched persona is held at (at least) its target share.
        if let Some(idx) = state.matched {
            let matched_uses = state.usage.iter().filter(|(_, i)| *i == idx).count();
            let share = if total_recent == 0 {
                0.0
            } else {
                matched_uses as f64 / total_recent as f64
            };
            if share < MATCHED_TARGET_SHARE {
                let persona = state.pool[idx].clone();
                state.usage.push_back((Instant::now(), idx));
                return persona;
            }
        }

        // Keep the mobile/desktop mix near target.
        let mobile_recent = state
            .usage
            .iter()
            .filter(|(_, i)| state.pool[*i].device_class == DeviceClass::Mobile)
            .count();
        let mobile_share = if total_recent == 0 {
            rng.gen::<f64>() // cold start: fall through to the ratio coin
        } else {
            mobile_recent as f64 / total_recent as f64
        };
        let want_mobile = mobile_share < self.mobile_ratio;

        let candidates: Vec<usize> = {
            let filtered: Vec<usize> = state
                .pool
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    (p.device_class == DeviceClass::Mobile) == want_mobile
                })
                .map(|(i, _)| i)
                .collect();
            if filtered.is_empty() {
                (0..state.pool.len()).collect()
            } else {
                filtered
            }
        };

        // Weighted draw with over-use suppression.
        let weight_sum: f64 = candidates.iter().map(|&i| state.pool[i].weight).sum();
        let weights: Vec<f64> = candidates
            .iter()
            .map(|&i| {
                let fair = state.pool[i].weight / weight_sum;
                let uses = state.usage.iter().filter(|(_, u)| *u == i).count();
                let share = if total_recent == 0 {
                    0.0
                } else {
                    uses as f64 / total_recent as f64
                };
                if share > OVERUSE_FACTOR * fair {
                    state.pool[i].weight * SUPPRESSION
                } else {
                    state.pool[i].weight
                }
            })
            .collect();

        let idx = candidates[weighted_index(&weights, rng)];
        let persona = state.pool[idx].clone();
        state.usage.push_back((Instant::now(), idx));
        persona
    }

    /// Align one desktop persona with a user-reported fingerprint bundle.
    /// Returns whether an alignment happened.
    pub fn apply_fingerprint(&self, bundle: FingerprintBundle) -> bool {
        if !self.match_enabled {
            return false;
        }
        let mut state = self.state.lock().expect("persona lock poisoned");

        // Closest desktop persona by viewport distance.
        let target = state
            .pool
            .iter()
            .enumerate()
            .filter(|(_, p)| p.device_class == DeviceClass::Desktop)
            .min_by_key(|(_, p)| {
                let dw = bundle.width.map_or(0, |w| p.viewport.0.abs_diff(w));
                let dh = bundle.height.map_or(0, |h| p.viewport.1.abs_diff(h));
                dw + dh
            })
            .map(|(i, _)| i);

        let Some(idx) = target else {
            return false;
        };

        let mut aligned = (*state.pool[idx]).clone();
        if let Some(w) = bundle.width {
            aligned.viewport.0 = w;
        }
        if let Some(h) = bundle.height {
            aligned.viewport.1 = h;
        }
        if let Some(ua) = &bundle.user_agent {
            aligned.user_agent = ua.clone();
        }
        aligned.fingerprint = Some(bundle);
        info!(persona = %aligned.name, "persona aligned with reported fingerprint");
        state.pool[idx] = Arc::new(aligned);
        state.matched = Some(idx);
        true
    }

    fn prune(usage: &mut VecDeque<(Instant, usize)>) {
        let now = Instant::now();
        while let Some((ts, _)) = usage.front() {
            if now.duration_since(*ts) > USAGE_WINDOW {
                usage.pop_front();
            } else {
                break;
            }
        }
    }
}

fn weighted_index(weights: &[f64], rng: &mut ChaCha8Rng) -> usize {
    let total: f64 = weights.iter().sum();
    let mut roll = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if roll < *w {
            return i;
        }
        roll -= w;
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use poisson_timing::RngSeed;

    fn persona(name: &str, class: DeviceClass, viewport: (u32, u32)) -> Persona {
        Persona {
            name: name.into(),
            user_agent: format!("UA/{name}"),
            viewport,
            platform: "test".into(),
            languages: vec!["en-US".into()],
            timezone: None,
            accept_encoding: "gzip".into(),
            device_class: class,
            weight: 1.0,
            fingerprint: None,
        }
    }

    fn pool() -> Vec<Persona> {
        vec![
            persona("desk-a", DeviceClass::Desktop, (1920, 1080)),
            persona("desk-b", DeviceClass::Desktop, (2560, 1440)),
            persona("desk-c", DeviceClass::Desktop, (1366, 768)),
            persona("mob-a", DeviceClass::Mobile, (390, 844)),
            persona("mob-b", DeviceClass::Mobile, (412, 915)),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn mix_approximates_ratio() {
        let reg = PersonaRegistry::new(pool(), true);
        let mut rng = RngSeed(7).stream("personas");
        let mut mobile = 0;
        let n = 1000;
        for _ in 0..n {
            if reg.pick(&mut rng).device_class == DeviceClass::Mobile {
                mobile += 1;
            }
        }
        let share = mobile as f64 / n as f64;
        assert!((0.2..0.4).contains(&share), "mobile share {share}");
    }

    #[tokio::test(start_paused = true)]
    async fn fingerprint_alignment_flags_and_matches_viewport() {
        let reg = PersonaRegistry::new(pool(), true);
        assert!(!reg.fingerprint_matched());
        assert!(reg.apply_fingerprint(FingerprintBundle {
            width: Some(2560),
            height: Some(1440),
            ..Default::default()
        }));
        assert!(reg.fingerprint_matched());

        // The matched persona takes >= 30% of subsequent sessions and
        // carries the reported viewport.
        let mut rng = RngSeed(3).stream("personas");
        let n = 500;
        let matched_uses = (0..n)
            .filter(|_| {
                let p = reg.pick(&mut rng);
                p.viewport == (2560, 1440)
            })
            .count();
        assert!(
            matched_uses as f64 / n as f64 >= 0.29,
            "matched share {matched_uses}/{n}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn match_disabled_is_inert() {
        let reg = PersonaRegistry::new(pool(), false);
        assert!(!reg.apply_fingerprint(FingerprintBundle {
            width: Some(2560),
            ..Default::default()
        }));
        assert!(!reg.fingerprint_matched());
    }

    #[tokio::test(start_paused = true)]
    async fn overused_persona_suppressed() {
        // Two desktop personas with equal weight: neither should dominate.
        let reg = PersonaRegistry::new(
            vec![
                persona("desk-a", DeviceClass::Desktop, (1920, 1080)),
                persona("desk-b", DeviceClass::Desktop, (2560, 1440)),
            ],
            false,
        );
        let mut rng = RngSeed(11).stream("personas");
        let n = 600;
        let a_uses = (0..n)
            .filter(|_| reg.pick(&mut rng).name == "desk-a")
            .count();
        let share = a_uses as f64 / n as f64;
        assert!((0.3..0.7).contains(&share), "desk-a share {share}");
    }
}
