//! Runtime configuration — options.json blob, `POISSON_*` env, compiled defaults
//!
//! Pure resolution and validation. Hot state (intensity changes via the
//! control plane) lives with the scheduler, not here.

use crate::error::{Error, Result};
use crate::types::{Intensity, ScheduleMode};
use serde::Deserialize;
use std::path::Path;

/// Raw options blob as supplied by the host platform. Every field optional;
/// unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawOptions {
    pub intensity: Option<String>,
    pub enable_search_noise: Option<bool>,
    pub enable_browse_noise: Option<bool>,
    pub enable_dns_noise: Option<bool>,
    pub enable_ad_clicks: Option<bool>,
    pub enable_tor: Option<bool>,
    pub enable_research_noise: Option<bool>,
    pub max_bandwidth_mb_per_hour: Option<i64>,
    pub max_concurrent_sessions: Option<i64>,
    pub match_browser_fingerprint: Option<bool>,
    pub schedule_mode: Option<String>,
    pub obsession_probability: Option<f64>,
}

impl RawOptions {
    /// Load from a specific path. A missing file is fine (defaults apply);
    /// a present but malformed file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::config("options.json", e.to_string())),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Overlay `POISSON_*` environment variables on top of the blob.
    pub fn overlay_env(mut self) -> Self {
        fn env_bool(key: &str) -> Option<bool> {
            std::env::var(key)
                .ok()
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
        }
        fn env_int(key: &str) -> Option<i64> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if let Ok(v) = std::env::var("POISSON_INTENSITY") {
            self.intensity = Some(v);
        }
        if let Some(v) = env_bool("POISSON_ENABLE_SEARCH_NOISE") {
            self.enable_search_noise = Some(v);
        }
        if let Some(v) = env_bool("POISSON_ENABLE_BROWSE_NOISE") {
            self.enable_browse_noise = Some(v);
        }
        if let Some(v) = env_bool("POISSON_ENABLE_DNS_NOISE") {
            self.enable_dns_noise = Some(v);
        }
        if let Some(v) = env_bool("POISSON_ENABLE_AD_CLICKS") {
            self.enable_ad_clicks = Some(v);
        }
        if let Some(v) = env_bool("POISSON_ENABLE_TOR") {
            self.enable_tor = Some(v);
        }
        if let Some(v) = env_bool("POISSON_ENABLE_RESEARCH_NOISE") {
            self.enable_research_noise = Some(v);
        }
        if let Some(v) = env_int("POISSON_MAX_BANDWIDTH_MB_PER_HOUR") {
            self.max_bandwidth_mb_per_hour = Some(v);
        }
        if let Some(v) = env_int("POISSON_MAX_CONCURRENT_SESSIONS") {
            self.max_concurrent_sessions = Some(v);
        }
        if let Some(v) = env_bool("POISSON_MATCH_BROWSER_FINGERPRINT") {
            self.match_browser_fingerprint = Some(v);
        }
        if let Ok(v) = std::env::var("POISSON_SCHEDULE_MODE") {
            self.schedule_mode = Some(v);
        }
        self
    }

    /// Validate and fill defaults. Fails fast with a pointer to the
    /// offending key.
    pub fn resolve(self) -> Result<Config> {
        let intensity = match self.intensity.as_deref() {
            None => Intensity::default(),
            Some(s) => Intensity::parse(s).ok_or_else(|| {
                Error::config("intensity", format!("unknown level '{s}' (expected low|medium|high|paranoid)"))
            })?,
        };

        let schedule_mode = match self.schedule_mode.as_deref() {
            None => ScheduleMode::default(),
            Some(s) => ScheduleMode::parse(s).ok_or_else(|| {
                Error::config("schedule_mode", format!("unknown mode '{s}' (expected always|home_only|away_only|custom)"))
            })?,
        };

        let max_bandwidth_mb_per_hour = match self.max_bandwidth_mb_per_hour {
            None => 50,
            Some(n) if n >= 1 => n as u64,
            Some(n) => {
                return Err(Error::config(
                    "max_bandwidth_mb_per_hour",
                    format!("{n} out of range (must be >= 1)"),
                ))
            }
        };

        let max_concurrent_sessions = match self.max_concurrent_sessions {
            None => 2,
            Some(n) if (1..=5).contains(&n) => n as usize,
            Some(n) => {
                return Err(Error::config(
                    "max_concurrent_sessions",
                    format!("{n} out of range (must be 1-5)"),
                ))
            }
        };

        let obsession_probability = match self.obsession_probability {
            None => 0.02,
            Some(p) if (0.0..=1.0).contains(&p) => p,
            Some(p) => {
                return Err(Error::config(
                    "obsession_probability",
                    format!("{p} out of range (must be 0-1)"),
                ))
            }
        };

        Ok(Config {
            intensity,
            enable_search_noise: self.enable_search_noise.unwrap_or(true),
            enable_browse_noise: self.enable_browse_noise.unwrap_or(true),
            enable_dns_noise: self.enable_dns_noise.unwrap_or(true),
            enable_ad_clicks: self.enable_ad_clicks.unwrap_or(false),
            enable_tor: self.enable_tor.unwrap_or(false),
            enable_research_noise: self.enable_research_noise.unwrap_or(false),
            max_bandwidth_mb_per_hour,
            max_concurrent_sessions,
            match_browser_fingerprint: self.match_browser_fingerprint.unwrap_or(true),
            schedule_mode,
            obsession_probability,
        })
    }
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub intensity: Intensity,
    pub enable_search_noise: bool,
    pub enable_browse_noise: bool,
    pub enable_dns_noise: bool,
    pub enable_ad_clicks: bool,
    pub enable_tor: bool,
    pub enable_research_noise: bool,
    pub max_bandwidth_mb_per_hour: u64,
    pub max_concurrent_sessions: usize,
    pub match_browser_fingerprint: bool,
    pub schedule_mode: ScheduleMode,
    pub obsession_probability: f64,
}

impl Default for Config {
    fn default() -> Self {
        RawOptions::default().resolve().expect("defaults are valid")
    }
}

impl Config {
    /// Blob at `path` (if any) -> env overlay -> validation.
    pub fn load(path: &Path) -> Result<Self> {
        RawOptions::load(path)?.overlay_env().resolve()
    }

    pub fn engine_enabled(&self, kind: crate::types::EngineKind) -> bool {
        use crate::types::EngineKind::*;
        match kind {
            Search => self.enable_search_noise,
            Browse => self.enable_browse_noise,
            Dns => self.enable_dns_noise,
            Research => self.enable_research_noise,
            Tor => self.enable_tor,
            Adclick => self.enable_ad_clicks,
        }
    }
}
