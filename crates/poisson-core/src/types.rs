//! Core types for Poisson

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Activity intensity level, mapped to a base event rate (events per hour).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    #[default]
    Medium,
    High,
    Paranoid,
}

impl Intensity {
    /// Base λ in events per hour.
    pub fn lambda_base(&self) -> f64 {
        match self {
            Intensity::Low => 18.0,
            Intensity::Medium => 60.0,
            Intensity::High => 150.0,
            Intensity::Paranoid => 300.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Intensity::Low),
            "medium" => Some(Intensity::Medium),
            "high" => Some(Intensity::High),
            "paranoid" => Some(Intensity::Paranoid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
            Intensity::Paranoid => "paranoid",
        }
    }
}

/// When the scheduler is allowed to emit events.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Always,
    HomeOnly,
    AwayOnly,
    Custom,
}

impl ScheduleMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(ScheduleMode::Always),
            "home_only" => Some(ScheduleMode::HomeOnly),
            "away_only" => Some(ScheduleMode::AwayOnly),
            "custom" => Some(ScheduleMode::Custom),
            _ => None,
        }
    }

    /// Whether the gate is open given the current presence state.
    pub fn gate_open(&self, home: bool) -> bool {
        match self {
            ScheduleMode::Always | ScheduleMode::Custom => true,
            ScheduleMode::HomeOnly => home,
            ScheduleMode::AwayOnly => !home,
        }
    }
}

/// Health of the local Tor SOCKS proxy.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TorStatus {
    #[default]
    Disabled,
    Connecting,
    Connected,
    Offline,
}

/// The six noise engines.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Search,
    Browse,
    Dns,
    Research,
    Tor,
    Adclick,
}

impl EngineKind {
    pub const ALL: [EngineKind; 6] = [
        EngineKind::Search,
        EngineKind::Browse,
        EngineKind::Dns,
        EngineKind::Research,
        EngineKind::Tor,
        EngineKind::Adclick,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Search => "search",
            EngineKind::Browse => "browse",
            EngineKind::Dns => "dns",
            EngineKind::Research => "research",
            EngineKind::Tor => "tor",
            EngineKind::Adclick => "adclick",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "search" => Some(EngineKind::Search),
            "browse" => Some(EngineKind::Browse),
            "dns" => Some(EngineKind::Dns),
            "research" => Some(EngineKind::Research),
            "tor" => Some(EngineKind::Tor),
            "adclick" => Some(EngineKind::Adclick),
            _ => None,
        }
    }

    /// Engines that are safe to run without explicit opt-in.
    pub fn allowed_by_safety_default(&self) -> bool {
        matches!(self, EngineKind::Search | EngineKind::Browse | EngineKind::Dns)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desktop vs mobile persona pool.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

/// Optional user-reported fingerprint signals from the dashboard or extension.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintBundle {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub user_agent: Option<String>,
    pub canvas_hash: Option<String>,
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
    pub fonts: Vec<String>,
}

/// A coherent bundle of browser-identifying attributes, pinned to a session
/// for its whole life.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    /// May be left empty in the data file; the loader backfills from the
    /// shared user-agent pool.
    #[serde(default)]
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub platform: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_accept_encoding")]
    pub accept_encoding: String,
    #[serde(default)]
    pub device_class: DeviceClass,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<FingerprintBundle>,
}

fn default_accept_encoding() -> String {
    "gzip, deflate, br".to_string()
}

fn default_weight() -> f64 {
    1.0
}

/// A sustained topical bias applied to session draws over hours to days.
#[derive(Clone, Debug, Serialize)]
pub struct Obsession {
    pub category: String,
    pub expires_at: DateTime<Utc>,
    pub strength: f64,
}

impl Obsession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// What the topic model handed out for one session.
#[derive(Clone, Debug)]
pub struct TopicDraw {
    pub category: String,
    pub query_hint: Option<String>,
    /// Number of related queries for a multi-query research run, if scheduled.
    pub research_queries: Option<u8>,
    pub from_obsession: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Page,
    Dns,
    Api,
}

/// A concrete unit of network work produced by an engine.
#[derive(Clone, Debug)]
pub struct Task {
    pub engine: EngineKind,
    pub url: String,
    pub kind: TaskKind,
    pub expected_bytes: u64,
    pub post_delay_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Skipped,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Skipped => "skipped",
            Outcome::Error => "error",
        }
    }
}

/// Append-only record for the activity ring.
#[derive(Clone, Debug, Serialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub engine: EngineKind,
    pub detail: String,
    pub bytes: u64,
    pub outcome: Outcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Running,
    Stopping,
    Done,
    Failed,
}
