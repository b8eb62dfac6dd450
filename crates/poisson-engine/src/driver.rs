//! Page driver interface
//!
//! The headless browser is an external collaborator; the core only knows
//! this contract. One driver instance per session, hard-capped at the
//! session slot count by the session manager.

use async_trait::async_trait;
use poisson_core::Persona;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PageResult {
    pub bytes_read: u64,
    pub final_url: String,
    pub ok: bool,
    pub error: Option<String>,
}

impl PageResult {
    pub fn ok(bytes_read: u64, final_url: impl Into<String>) -> Self {
        Self {
            bytes_read,
            final_url: final_url.into(),
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            bytes_read: 0,
            final_url: String::new(),
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait PageDriver: Send {
    async fn open(&mut self, url: &str, persona: &Persona, timeout: Duration) -> PageResult;
    async fn follow(&mut self, link_index: usize, timeout: Duration) -> PageResult;
    async fn click_ad(&mut self, timeout: Duration) -> PageResult;
    async fn close(&mut self);
}

/// Hands out driver instances; the session manager caps concurrency.
pub trait DriverPool: Send + Sync {
    fn new_driver(&self) -> Box<dyn PageDriver>;
}

/// Deterministic driver for tests and browserless deployments: fixed bytes
/// and latency per page, with an optional every-Nth-call failure pattern.
pub struct StubPool {
    bytes_per_page: u64,
    latency: Duration,
    fail_every: Option<u64>,
    calls: Arc<AtomicU64>,
}

impl StubPool {
    pub fn new(bytes_per_page: u64, latency: Duration) -> Self {
        Self {
            bytes_per_page,
            latency,
            fail_every: None,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Every `n`-th driver call (across all sessions) fails.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl DriverPool for StubPool {
    fn new_driver(&self) -> Box<dyn PageDriver> {
        Box::new(StubDriver {
            bytes_per_page: self.bytes_per_page,
            latency: self.latency,
            fail_every: self.fail_every,
            calls: self.calls.clone(),
            url: String::new(),
        })
    }
}

pub struct StubDriver {
    bytes_per_page: u64,
    latency: Duration,
    fail_every: Option<u64>,
    calls: Arc<AtomicU64>,
    url: String,
}

impl StubDriver {
    async fn fetch(&mut self, timeout: Duration) -> PageResult {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.latency.min(timeout)).await;
        if self.latency > timeout {
            return PageResult::failed("driver timeout");
        }
        if let Some(k) = self.fail_every {
            if n % k == 0 {
                return PageResult::failed("stub failure");
            }
        }
        PageResult::ok(self.bytes_per_page, self.url.clone())
    }
}

#[async_trait]
impl PageDriver for StubDriver {
    async fn open(&mut self, url: &str, _persona: &Persona, timeout: Duration) -> PageResult {
        self.url = url.to_string();
        self.fetch(timeout).await
    }

    async fn follow(&mut self, link_index: usize, timeout: Duration) -> PageResult {
        self.url = format!("{}#link{link_index}", self.url);
        self.fetch(timeout).await
    }

    async fn click_ad(&mut self, timeout: Duration) -> PageResult {
        self.fetch(timeout).await
    }

    async fn close(&mut self) {}
}
