//! Scheduler orchestrator — the top-level tick loop
//!
//! Waits on the timing kernel, consults the schedule-mode gate, asks the
//! topic model / persona registry / engine dispatcher for the pieces of a
//! task, and submits it to the session manager. Auxiliary loops run the
//! independent DNS tick stream, obsession maintenance, and the slot
//! auditor. The whole structure is shared with the control plane, which
//! reads state and flips toggles through it.

use crate::activity::ActivityRing;
use crate::bandwidth::{BandwidthGovernor, DEFAULT_WINDOW};
use crate::driver::DriverPool;
use crate::engines::{tor, EngineContext, EngineSet};
use crate::ext::{ExtBridge, ExtTask};
use crate::persona::PersonaRegistry;
use crate::session::{Admission, SessionManager};
use crate::stats::DayStats;
use crate::topic::{TopicModel, RESEARCH_CATEGORIES};
use poisson_core::{
    Config, DataStore, EngineKind, Intensity, Obsession, TaskKind, TopicDraw, TorStatus,
};
use poisson_timing::{EventTag, IntensityProfile, RngSeed, TimingKernel};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const TOR_SOCKS_ADDR: &str = "127.0.0.1:9050";
const AUDIT_INTERVAL: Duration = Duration::from_secs(60);
const OBSESSION_SWEEP: Duration = Duration::from_secs(600);
/// Share of browser tasks mirrored to a registered extension.
const EXT_MIRROR_PROBABILITY: f64 = 0.25;

pub type SchedulerHandle = Arc<Scheduler>;

pub struct Scheduler {
    config: Config,
    data: Arc<DataStore>,
    pub engines: Arc<EngineSet>,
    pub sessions: Arc<SessionManager>,
    pub governor: Arc<BandwidthGovernor>,
    pub ring: Arc<ActivityRing>,
    pub stats: Arc<DayStats>,
    pub personas: Arc<PersonaRegistry>,
    pub topics: Arc<TopicModel>,
    pub ext: Arc<ExtBridge>,

    intensity: Mutex<Intensity>,
    profile_tx: watch::Sender<IntensityProfile>,
    gate_tx: watch::Sender<bool>,
    presence_home: Mutex<bool>,
    tor_status: watch::Receiver<TorStatus>,
    next_eta: Mutex<Option<Instant>>,
    current_persona: Mutex<Option<String>>,
    started_at: std::time::Instant,
    seed: RngSeed,
    dispatch_rng: Mutex<ChaCha8Rng>,
    persona_rng: Mutex<ChaCha8Rng>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: Config,
        data: Arc<DataStore>,
        drivers: Arc<dyn DriverPool>,
        seed: RngSeed,
        cancel: CancellationToken,
    ) -> SchedulerHandle {
        let tor_status = tor::spawn_probe(
            config.enable_tor,
            TOR_SOCKS_ADDR.to_string(),
            cancel.child_token(),
        );
        let engines = Arc::new(EngineSet::standard(&config, tor_status.clone()));
        let governor = Arc::new(BandwidthGovernor::new(
            config.max_bandwidth_mb_per_hour,
            DEFAULT_WINDOW,
        ));
        let ring = Arc::new(ActivityRing::default());
        let stats = Arc::new(DayStats::new());
        let sessions = Arc::new(SessionManager::new(
            config.max_concurrent_sessions,
            governor.clone(),
            ring.clone(),
            engines.clone(),
            stats.clone(),
            drivers,
            cancel.child_token(),
        ));
        let personas = Arc::new(PersonaRegistry::new(
            data.snapshot().personas.clone(),
            config.match_browser_fingerprint,
        ));
        let topics = Arc::new(TopicModel::new(
            config.obsession_probability,
            seed.stream("topics"),
        ));
        let ext = Arc::new(ExtBridge::new(stats.clone()));

        let (profile_tx, _) = watch::channel(IntensityProfile::new(config.intensity, seed.0));
        let gate_open = config.schedule_mode.gate_open(true);
        let (gate_tx, _) = watch::channel(gate_open);

        Arc::new(Self {
            intensity: Mutex::new(config.intensity),
            engines,
            sessions,
            governor,
            ring,
            stats,
            personas,
            topics,
            ext,
            data,
            profile_tx,
            gate_tx,
            presence_home: Mutex::new(true),
            tor_status,
            next_eta: Mutex::new(None),
            current_persona: Mutex::new(None),
            started_at: std::time::Instant::now(),
            seed,
            dispatch_rng: Mutex::new(seed.stream("dispatch")),
            persona_rng: Mutex::new(seed.stream("personas")),
            cancel,
            config,
        })
    }

    /// Spawn every loop. Returns immediately; the loops stop when the root
    /// token is cancelled.
    pub fn run(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move { this.session_loop().await });

        if self.config.enable_dns_noise {
            let this = self.clone();
            tokio::spawn(async move { this.dns_loop().await });
        }

        let this = self.clone();
        tokio::spawn(async move { this.maintenance_loop().await });
    }

    /// Stop emitting, cancel live sessions with the grace window.
    pub async fn stop(&self) {
        info!("scheduler stopping");
        self.cancel.cancel();
        self.sessions.stop().await;
    }

    async fn session_loop(self: Arc<Self>) {
        let mut kernel = TimingKernel::new(
            EventTag::SessionStart,
            self.profile_tx.subscribe(),
            self.gate_tx.subscribe(),
            self.seed.stream("kernel.sessions"),
        );
        self.arm_eta();
        while let Some(event) = kernel.next(&self.cancel).await {
            // Re-check the gate at dispatch; a closed gate discards.
            if !*self.gate_tx.borrow() {
                continue;
            }
            debug!(lambda = event.lambda, "session event fired");
            self.arm_eta();
            self.dispatch_session();
        }
    }

    fn dispatch_session(&self) {
        let tables = self.data.snapshot();
        let research_on = self.engines.is_enabled(EngineKind::Research);
        let allowed = move |cat: &str| research_on || !RESEARCH_CATEGORIES.contains(&cat);
        let Some(topic) = self.topics.next_topic(&tables, &allowed) else {
            debug!("no drawable topic category");
            return;
        };

        let persona = {
            let mut rng = self.persona_rng.lock().expect("rng lock poisoned");
            self.personas.pick(&mut rng)
        };
        *self
            .current_persona
            .lock()
            .expect("persona name lock poisoned") = Some(persona.name.clone());

        let mut rng = self.dispatch_rng.lock().expect("rng lock poisoned");
        let Some(kind) = self
            .engines
            .pick(&mut rng, self.sessions.has_free_slot())
        else {
            debug!("no eligible engine");
            return;
        };
        let ctx = EngineContext {
            tables: &tables,
            topic: &topic,
            persona: &persona,
        };
        let Some(task) = self.engines.produce(kind, &ctx, &mut rng) else {
            // Engine bowed out (tor offline, missing category); not an error.
            debug!(engine = %kind, "engine produced no task");
            return;
        };

        if self.ext.is_registered()
            && task.kind == TaskKind::Page
            && rng.gen::<f64>() < EXT_MIRROR_PROBABILITY
        {
            self.ext.offer(ExtTask {
                task_type: "visit",
                url: task.url.clone(),
                delay_ms: task.post_delay_ms,
            });
        }
        drop(rng);

        match self
            .sessions
            .admit(task, persona, topic, tables.clone())
        {
            Admission::Accepted => {}
            Admission::Rejected(reason) => debug!(reason, "task rejected"),
        }
    }

    /// Independent DNS tick stream, same intensity profile, own substream.
    async fn dns_loop(self: Arc<Self>) {
        let mut kernel = TimingKernel::new(
            EventTag::DnsTick,
            self.profile_tx.subscribe(),
            self.gate_tx.subscribe(),
            self.seed.stream("kernel.dns"),
        );
        while let Some(_event) = kernel.next(&self.cancel).await {
            if !*self.gate_tx.borrow() || !self.engines.is_enabled(EngineKind::Dns) {
                continue;
            }
            let tables = self.data.snapshot();
            // DNS ignores topic; a placeholder draw keeps the engine
            // contract uniform without rolling obsession dice.
            let topic = TopicDraw {
                category: String::new(),
                query_hint: None,
                research_queries: None,
                from_obsession: false,
            };
            let persona = {
                let mut rng = self.persona_rng.lock().expect("rng lock poisoned");
                self.personas.pick(&mut rng)
            };
            let task = {
                let mut rng = self.dispatch_rng.lock().expect("rng lock poisoned");
                let ctx = EngineContext {
                    tables: &tables,
                    topic: &topic,
                    persona: &persona,
                };
                self.engines.produce(EngineKind::Dns, &ctx, &mut rng)
            };
            if let Some(task) = task {
                let _ = self.sessions.admit(task, persona, topic, tables);
            }
        }
    }

    /// Obsession expiry sweep and the slot auditor.
    async fn maintenance_loop(self: Arc<Self>) {
        let mut sweep = tokio::time::interval(OBSESSION_SWEEP);
        let mut audit = tokio::time::interval(AUDIT_INTERVAL);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sweep.tick() => {
                    debug!(tag = ?EventTag::ObsessionRefresh, "obsession sweep");
                    self.topics.expire_stale();
                }
                _ = audit.tick() => self.sessions.audit(),
            }
        }
    }

    /// Expected wait to the next session under the current rate.
    fn arm_eta(&self) {
        let profile = self.profile_tx.borrow().clone();
        let lambda = poisson_timing::intensity::RateFn::lambda(&profile, chrono::Local::now());
        let eta = if lambda > f64::EPSILON {
            Some(Instant::now() + Duration::from_secs_f64(1.0 / lambda))
        } else {
            None
        };
        *self.next_eta.lock().expect("eta lock poisoned") = eta;
    }

    // --- control-plane surface -------------------------------------------

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn intensity(&self) -> Intensity {
        *self.intensity.lock().expect("intensity lock poisoned")
    }

    /// Change intensity; the timing kernels pick it up on their next draw.
    pub fn set_intensity(&self, level: Intensity) {
        *self.intensity.lock().expect("intensity lock poisoned") = level;
        self.set_profile(IntensityProfile::new(level, self.seed.0));
        info!(intensity = level.as_str(), "intensity changed");
    }

    /// Install a custom rate profile (tests; diurnal-free deployments).
    pub fn set_profile(&self, profile: IntensityProfile) {
        // send_replace: the value must stick even before any kernel
        // subscribes.
        self.profile_tx.send_replace(profile);
    }

    pub fn gate_open(&self) -> bool {
        *self.gate_tx.borrow()
    }

    pub fn presence_home(&self) -> bool {
        *self.presence_home.lock().expect("presence lock poisoned")
    }

    /// Presence update from the control plane; recomputes the gate.
    pub fn set_presence(&self, home: bool) {
        *self.presence_home.lock().expect("presence lock poisoned") = home;
        let open = self.config.schedule_mode.gate_open(home);
        self.gate_tx.send_replace(open);
        info!(home, gate_open = open, "presence updated");
    }

    pub fn tor_status(&self) -> TorStatus {
        *self.tor_status.borrow()
    }

    pub fn current_persona(&self) -> Option<String> {
        self.current_persona
            .lock()
            .expect("persona name lock poisoned")
            .clone()
    }

    pub fn obsession(&self) -> Option<Obsession> {
        self.topics.obsession()
    }

    pub fn next_session_in_secs(&self) -> Option<u64> {
        self.next_eta
            .lock()
            .expect("eta lock poisoned")
            .map(|eta| eta.saturating_duration_since(Instant::now()).as_secs())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
