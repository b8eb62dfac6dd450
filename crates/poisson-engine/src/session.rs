//! Session manager — bounded concurrent sessions over the page driver
//!
//! Admission reserves a slot and consults the bandwidth governor before
//! anything touches the network. A session runner walks the Markov chain,
//! records bytes per driver call, and always releases its slot, whether it
//! finishes, fails, or is cancelled. An auditor cross-checks the slot
//! accounting so leaks are recoverable and countable.

use crate::activity::ActivityRing;
use crate::bandwidth::BandwidthGovernor;
use crate::driver::DriverPool;
use crate::engines::EngineSet;
use crate::stats::DayStats;
use dashmap::DashMap;
use poisson_core::{
    DataTables, EngineKind, Outcome, Persona, SessionId, SessionState, Task, TaskKind, TopicDraw,
};
use poisson_timing::rng::hash_label;
use poisson_timing::{BrowseState, MarkovChain};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace window for cancellation before a slot is force-released.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);
/// Floor for page-load timeouts; dwell caps on fast states are shorter
/// than a slow page load.
const PAGE_LOAD_FLOOR: Duration = Duration::from_secs(90);
/// Absolute session duration ceiling.
const SESSION_CEILING: Duration = Duration::from_secs(3 * 3600);
const DNS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(&'static str),
}

struct LiveSession {
    cancel: CancellationToken,
    state: std::sync::Mutex<SessionState>,
}

pub struct SessionManager {
    max_sessions: usize,
    slots: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    live: Arc<DashMap<SessionId, LiveSession>>,
    governor: Arc<BandwidthGovernor>,
    ring: Arc<ActivityRing>,
    engines: Arc<EngineSet>,
    stats: Arc<DayStats>,
    drivers: Arc<dyn DriverPool>,
    root_cancel: CancellationToken,
    slot_leaks: AtomicU64,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_sessions: usize,
        governor: Arc<BandwidthGovernor>,
        ring: Arc<ActivityRing>,
        engines: Arc<EngineSet>,
        stats: Arc<DayStats>,
        drivers: Arc<dyn DriverPool>,
        root_cancel: CancellationToken,
    ) -> Self {
        Self {
            max_sessions,
            slots: Arc::new(Semaphore::new(max_sessions)),
            running: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(DashMap::new()),
            governor,
            ring,
            engines,
            stats,
            drivers,
            root_cancel,
            slot_leaks: AtomicU64::new(0),
        }
    }

    pub fn active(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.available_permits() > 0
    }

    pub fn slot_leaks(&self) -> u64 {
        self.slot_leaks.load(Ordering::Relaxed)
    }

    /// Admit a task: bandwidth first, then (for browser work) a session
    /// slot, reserved before the driver launches. Rejections are logged as
    /// `skipped`, never as engine errors.
    pub fn admit(
        self: &Arc<Self>,
        task: Task,
        persona: Arc<Persona>,
        topic: TopicDraw,
        tables: Arc<DataTables>,
    ) -> Admission {
        if self.root_cancel.is_cancelled() {
            return Admission::Rejected("shutting down");
        }

        if let Err(used) = self.governor.admit(task.engine) {
            debug!(engine = %task.engine, used, "task rejected by bandwidth governor");
            self.engines.on_complete(&task, Outcome::Skipped, 0);
            self.ring.record(
                task.engine,
                "bandwidth cap reached",
                0,
                Outcome::Skipped,
                &task.url,
                &persona.name,
                "-",
            );
            return Admission::Rejected("bandwidth cap");
        }

        match task.kind {
            TaskKind::Dns => {
                let mgr = self.clone();
                tokio::spawn(async move { mgr.run_dns(task, persona).await });
                Admission::Accepted
            }
            TaskKind::Page => {
                let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                    self.engines.on_complete(&task, Outcome::Skipped, 0);
                    self.ring.record(
                        task.engine,
                        "no free session slot",
                        0,
                        Outcome::Skipped,
                        &task.url,
                        &persona.name,
                        "-",
                    );
                    return Admission::Rejected("no free session slot");
                };
                let mgr = self.clone();
                tokio::spawn(async move {
                    mgr.run_session(permit, task, persona, topic, tables).await;
                });
                Admission::Accepted
            }
            TaskKind::Api => Admission::Rejected("api tasks run remotely"),
        }
    }

    /// One lightweight resolver hit; never occupies a browser slot.
    async fn run_dns(&self, task: Task, persona: Arc<Persona>) {
        let host = task.url.clone();
        let lookup = tokio::time::timeout(
            DNS_TIMEOUT,
            tokio::net::lookup_host((host.as_str(), 443u16)),
        )
        .await;
        self.stats.add_request();
        match lookup {
            Ok(Ok(_)) => {
                self.governor.record(EngineKind::Dns, task.expected_bytes);
                self.stats.add_bytes(task.expected_bytes);
                self.engines
                    .on_complete(&task, Outcome::Ok, task.expected_bytes);
                self.ring.record(
                    EngineKind::Dns,
                    format!("resolved {host}"),
                    task.expected_bytes,
                    Outcome::Ok,
                    &task.url,
                    &persona.name,
                    "-",
                );
            }
            _ => {
                self.stats.add_error();
                self.engines.on_complete(&task, Outcome::Error, 0);
                self.ring.record(
                    EngineKind::Dns,
                    format!("lookup failed for {host}"),
                    0,
                    Outcome::Error,
                    &task.url,
                    &persona.name,
                    "-",
                );
            }
        }
    }

    /// Full browsing session: open the task URL, walk the Markov chain,
    /// record bytes per driver call. The slot (permit) is held for the
    /// whole session and released on every exit path.
    async fn run_session(
        &self,
        permit: OwnedSemaphorePermit,
        task: Task,
        persona: Arc<Persona>,
        topic: TopicDraw,
        tables: Arc<DataTables>,
    ) {
        let id = SessionId::generate();
        let cancel = self.root_cancel.child_token();
        self.live.insert(
            id.clone(),
            LiveSession {
                cancel: cancel.clone(),
                state: std::sync::Mutex::new(SessionState::Running),
            },
        );
        self.running.fetch_add(1, Ordering::SeqCst);
        self.stats.add_session();

        let mut rng = ChaCha8Rng::seed_from_u64(
            hash_label(&persona.name) ^ hash_label(&topic.category) ^ hash_label(id.as_str()),
        );
        let planned = planned_duration(&mut rng);
        let hard_cap = planned.mul_f64(1.5).min(SESSION_CEILING);
        // A scheduled research run stretches the session across several
        // related queries; otherwise the engine shapes the budget.
        let page_budget = topic
            .research_queries
            .map(|n| n as usize)
            .unwrap_or_else(|| engine_page_budget(task.engine, &mut rng));
        let started = Instant::now();
        info!(
            session = %id,
            engine = %task.engine,
            persona = %persona.name,
            topic = %topic.category,
            planned_secs = planned.as_secs(),
            "session started"
        );

        let mut driver = self.drivers.new_driver();
        let mut chain = MarkovChain::seeded(&persona.name, &topic.category);
        let mut total_bytes = 0u64;
        let mut pages = 0usize;

        // Land.
        let timeout = page_timeout(chain.current());
        let first = tokio::select! {
            r = driver.open(&task.url, &persona, timeout) => Some(r),
            _ = cancel.cancelled() => None,
        };
        let Some(first) = first else {
            self.finish_cancelled(&id, &task, &persona, driver, total_bytes).await;
            drop(permit);
            return;
        };
        match self.absorb_result(&task, first) {
            Some(bytes) => {
                total_bytes += bytes;
                pages += 1;
            }
            None => {
                self.finish_failed(&id, &task, &persona, driver, total_bytes).await;
                drop(permit);
                return;
            }
        }

        loop {
            if started.elapsed() >= hard_cap || pages >= page_budget {
                break;
            }

            let dwell = chain.dwell();
            let dwelled = tokio::select! {
                _ = tokio::time::sleep(dwell) => true,
                _ = cancel.cancelled() => false,
            };
            if !dwelled {
                self.finish_cancelled(&id, &task, &persona, driver, total_bytes).await;
                drop(permit);
                return;
            }

            let state = chain.advance();
            if state == BrowseState::Leave {
                break;
            }

            let call = match state {
                BrowseState::FollowLink => Some(DriverCall::Follow(rng.gen_range(0..5))),
                BrowseState::SearchRefine => Some(DriverCall::Open(refine_url(
                    &task.url, &topic, &tables, &mut rng,
                ))),
                BrowseState::AdGlance if task.engine == EngineKind::Adclick => {
                    Some(DriverCall::ClickAd)
                }
                _ => None,
            };

            if let Some(call) = call {
                let timeout = page_timeout(state);
                let fut = async {
                    match call {
                        DriverCall::Follow(idx) => driver.follow(idx, timeout).await,
                        DriverCall::Open(url) => driver.open(&url, &persona, timeout).await,
                        DriverCall::ClickAd => driver.click_ad(timeout).await,
                    }
                };
                let result = tokio::select! {
                    r = fut => Some(r),
                    _ = cancel.cancelled() => None,
                };
                let Some(result) = result else {
                    self.finish_cancelled(&id, &task, &persona, driver, total_bytes).await;
                    drop(permit);
                    return;
                };
                match self.absorb_result(&task, result) {
                    Some(bytes) => {
                        total_bytes += bytes;
                        pages += 1;
                    }
                    None => {
                        self.finish_failed(&id, &task, &persona, driver, total_bytes).await;
                        drop(permit);
                        return;
                    }
                }
            }
        }

        // Linger briefly after the last load, the way a human leaves a tab
        // open for a beat before closing it.
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(task.post_delay_ms)) => {}
            _ = cancel.cancelled() => {}
        }

        driver.close().await;
        self.ring.record(
            task.engine,
            format!("{} session, {pages} pages", task.engine),
            total_bytes,
            Outcome::Ok,
            &task.url,
            &persona.name,
            id.as_str(),
        );
        info!(session = %id, pages, bytes = total_bytes, "session done");
        self.release(&id);
        drop(permit);
    }

    /// Fold one driver result into governor/stats. `None` means the
    /// session should fail.
    fn absorb_result(&self, task: &Task, result: crate::driver::PageResult) -> Option<u64> {
        self.stats.add_request();
        if result.ok {
            self.governor.record(task.engine, result.bytes_read);
            self.stats.add_bytes(result.bytes_read);
            self.engines
                .on_complete(task, Outcome::Ok, result.bytes_read);
            Some(result.bytes_read)
        } else {
            None
        }
    }

    async fn finish_failed(
        &self,
        id: &SessionId,
        task: &Task,
        persona: &Persona,
        mut driver: Box<dyn crate::driver::PageDriver>,
        bytes_so_far: u64,
    ) {
        // Transient task error: counted per engine, session failed, slot
        // released; nothing propagates upward.
        self.stats.add_error();
        self.engines.on_complete(task, Outcome::Error, 0);
        self.ring.record(
            task.engine,
            "driver error",
            bytes_so_far,
            Outcome::Error,
            &task.url,
            &persona.name,
            id.as_str(),
        );
        let _ = tokio::time::timeout(CANCEL_GRACE, driver.close()).await;
        debug!(session = %id, "session failed");
        self.release(id);
    }

    async fn finish_cancelled(
        &self,
        id: &SessionId,
        task: &Task,
        persona: &Persona,
        mut driver: Box<dyn crate::driver::PageDriver>,
        bytes_so_far: u64,
    ) {
        self.mark(id, SessionState::Stopping);
        info!(session = %id, "session cancelled, stopping driver");
        self.ring.record(
            task.engine,
            "session cancelled",
            bytes_so_far,
            Outcome::Skipped,
            &task.url,
            &persona.name,
            id.as_str(),
        );
        let _ = tokio::time::timeout(CANCEL_GRACE, driver.close()).await;
        self.release(id);
    }

    fn release(&self, id: &SessionId) {
        self.live.remove(id);
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    fn mark(&self, id: &SessionId, state: SessionState) {
        if let Some(entry) = self.live.get(id) {
            *entry.state.lock().expect("state lock poisoned") = state;
        }
    }

    /// Live sessions and their states, for observability.
    pub fn session_states(&self) -> Vec<(SessionId, SessionState)> {
        self.live
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    *e.value().state.lock().expect("state lock poisoned"),
                )
            })
            .collect()
    }

    /// Cancel one session. It transitions through stopping and releases
    /// its slot within the grace window.
    pub fn cancel_session(&self, id: &SessionId, reason: &str) -> bool {
        match self.live.get(id) {
            Some(entry) => {
                info!(session = %id, reason, "cancelling session");
                *entry.state.lock().expect("state lock poisoned") = SessionState::Stopping;
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop everything: cancel live sessions and wait out the grace
    /// window. Sessions still running afterwards are counted as leaks.
    pub async fn stop(&self) {
        self.root_cancel.cancel();
        let deadline = Instant::now() + CANCEL_GRACE;
        while self.running.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let stuck = self.running.load(Ordering::SeqCst);
        if stuck > 0 {
            warn!(stuck, "sessions still running after grace; force-releasing");
            self.slot_leaks.fetch_add(stuck as u64, Ordering::Relaxed);
        }
    }

    /// Invariant check: the slot accounting must agree with the gauge.
    /// Discrepancies are recovered by adding permits back and counted so
    /// clean runs can assert zero.
    pub fn audit(&self) {
        let running = self.running.load(Ordering::SeqCst);
        let free = self.slots.available_permits();
        let accounted = running + free;
        if accounted < self.max_sessions {
            let missing = self.max_sessions - accounted;
            warn!(missing, "slot leak detected; recovering");
            self.slots.add_permits(missing);
            self.slot_leaks.fetch_add(missing as u64, Ordering::Relaxed);
        }
    }
}

enum DriverCall {
    Follow(usize),
    Open(String),
    ClickAd,
}

fn page_timeout(state: BrowseState) -> Duration {
    state.dwell_cap().max(PAGE_LOAD_FLOOR)
}

/// Soft page budget per session, shaped by engine semantics: a search is
/// usually one results page (20% follow a result), a browse session walks
/// 1-5 internal links past the landing page.
fn engine_page_budget(engine: EngineKind, rng: &mut ChaCha8Rng) -> usize {
    match engine {
        EngineKind::Search => {
            if rng.gen::<f64>() < 0.2 {
                2
            } else {
                1
            }
        }
        EngineKind::Browse | EngineKind::Research | EngineKind::Tor => rng.gen_range(2..=6),
        EngineKind::Adclick => 3,
        EngineKind::Dns => 1,
    }
}

/// Planned session length: log-normal, 30 s to ~2 h.
fn planned_duration(rng: &mut ChaCha8Rng) -> Duration {
    let dist = LogNormal::new(300.0_f64.ln(), 1.2).expect("valid lognormal");
    let secs: f64 = dist.sample(rng);
    Duration::from_secs_f64(secs.clamp(30.0, 7200.0))
}

/// A refined search: the original query plus one more term.
fn refine_url(
    url: &str,
    topic: &TopicDraw,
    tables: &DataTables,
    rng: &mut ChaCha8Rng,
) -> String {
    let extra = tables
        .search_terms
        .get(&topic.category)
        .filter(|t| !t.is_empty())
        .map(|t| t[rng.gen_range(0..t.len())].replace(' ', "+"))
        .unwrap_or_else(|| "review".to_string());
    format!("{url}+{extra}")
}
