//! Extension bridge — an optional remote engine instance
//!
//! A browser extension may poll for small visit tasks and report counters
//! back. The bridge is a bounded mailbox the orchestrator tops up; it is
//! never on the scheduling critical path and contributes stats only.

use crate::stats::DayStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::info;

const QUEUE_CAP: usize = 16;
/// A client that has not polled for this long is considered gone.
const STALE_AFTER_SECS: i64 = 300;

#[derive(Clone, Debug, Serialize)]
pub struct ExtTask {
    #[serde(rename = "type")]
    pub task_type: &'static str,
    pub url: String,
    pub delay_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExtClient {
    pub id: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

struct ExtState {
    client: Option<ExtClient>,
    queue: VecDeque<ExtTask>,
}

pub struct ExtBridge {
    state: Mutex<ExtState>,
    stats: Arc<DayStats>,
}

impl ExtBridge {
    pub fn new(stats: Arc<DayStats>) -> Self {
        Self {
            state: Mutex::new(ExtState {
                client: None,
                queue: VecDeque::new(),
            }),
            stats,
        }
    }

    pub fn register(&self, id: impl Into<String>) -> ExtClient {
        let now = Utc::now();
        let client = ExtClient {
            id: id.into(),
            registered_at: now,
            last_seen: now,
        };
        info!(id = %client.id, "extension registered");
        let mut state = self.state.lock().expect("ext lock poisoned");
        state.client = Some(client.clone());
        client
    }

    pub fn is_registered(&self) -> bool {
        let state = self.state.lock().expect("ext lock poisoned");
        state
            .client
            .as_ref()
            .is_some_and(|c| (Utc::now() - c.last_seen).num_seconds() < STALE_AFTER_SECS)
    }

    /// Fold remotely-executed work into today's counters.
    pub fn heartbeat(&self, requests: u64, bytes: u64) {
        let mut state = self.state.lock().expect("ext lock poisoned");
        if let Some(client) = state.client.as_mut() {
            client.last_seen = Utc::now();
        }
        drop(state);
        self.stats.add_requests(requests);
        self.stats.add_bytes(bytes);
    }

    /// Offer a task to the extension, dropping the oldest at capacity.
    pub fn offer(&self, task: ExtTask) {
        let mut state = self.state.lock().expect("ext lock poisoned");
        if state.client.is_none() {
            return;
        }
        if state.queue.len() == QUEUE_CAP {
            state.queue.pop_front();
        }
        state.queue.push_back(task);
    }

    pub fn next_task(&self) -> Option<ExtTask> {
        let mut state = self.state.lock().expect("ext lock poisoned");
        if let Some(client) = state.client.as_mut() {
            client.last_seen = Utc::now();
        }
        state.queue.pop_front()
    }
}
