//! End-to-end scheduler scenarios against the stub page driver, run on
//! tokio's paused clock so an hour of traffic takes milliseconds.

use poisson_core::data::WeightedSite;
use poisson_core::{
    Config, DataStore, DataTables, DeviceClass, EngineKind, Intensity, Outcome, Persona,
    ScheduleMode,
};
use poisson_engine::driver::StubPool;
use poisson_engine::Scheduler;
use poisson_timing::{IntensityProfile, RngSeed};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

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

fn tables() -> DataTables {
    let mut sites = HashMap::new();
    sites.insert(
        "news_left".to_string(),
        vec![WeightedSite {
            url: "https://example.org/news".into(),
            weight: 1.0,
        }],
    );
    sites.insert(
        "shopping".to_string(),
        vec![WeightedSite {
            url: "https://example.com/shop".into(),
            weight: 1.0,
        }],
    );
    let mut search_terms = HashMap::new();
    search_terms.insert(
        "news_left".to_string(),
        vec!["election coverage".to_string(), "city council vote".to_string()],
    );
    search_terms.insert("shopping".to_string(), vec!["running shoes".to_string()]);
    DataTables {
        sites,
        search_terms,
        personas: vec![
            persona("desk-a", DeviceClass::Desktop, (1920, 1080)),
            persona("desk-b", DeviceClass::Desktop, (2560, 1440)),
            persona("mob-a", DeviceClass::Mobile, (390, 844)),
        ],
        ..Default::default()
    }
}

fn search_only_config(intensity: Intensity, cap_mb: u64, slots: usize) -> Config {
    Config {
        intensity,
        enable_search_noise: true,
        enable_browse_noise: false,
        enable_dns_noise: false,
        enable_ad_clicks: false,
        enable_tor: false,
        enable_research_noise: false,
        max_bandwidth_mb_per_hour: cap_mb,
        max_concurrent_sessions: slots,
        match_browser_fingerprint: true,
        schedule_mode: ScheduleMode::Always,
        obsession_probability: 0.02,
    }
}

fn scheduler(
    config: Config,
    pool: StubPool,
    seed: u64,
) -> poisson_engine::SchedulerHandle {
    let data = Arc::new(DataStore::from_tables(tables()));
    Scheduler::new(
        config,
        data,
        Arc::new(pool),
        RngSeed(seed),
        CancellationToken::new(),
    )
}

#[tokio::test(start_paused = true)]
async fn s1_medium_search_hour_completes_cleanly() {
    let sched = scheduler(
        search_only_config(Intensity::Medium, 50, 1),
        StubPool::new(300_000, Duration::from_secs(2)),
        0xA1,
    );
    sched.set_profile(IntensityProfile::constant(60.0));
    sched.run();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    sched.stop().await;

    let day = sched.stats.snapshot();
    assert!(
        (45..=75).contains(&(day.sessions as i64)),
        "expected ~60 sessions, got {}",
        day.sessions
    );
    assert_eq!(day.errors, 0);
    assert!(day.bytes <= 50_000_000, "bytes {}", day.bytes);
    assert_eq!(sched.ring.count_outcome(Outcome::Error), 0);
    assert_eq!(sched.sessions.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn s2_tight_bandwidth_cap_skips_and_bounds() {
    let sched = scheduler(
        search_only_config(Intensity::Medium, 5, 1),
        StubPool::new(300_000, Duration::from_secs(2)),
        0xB2,
    );
    sched.set_profile(IntensityProfile::constant(60.0));
    sched.run();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    sched.stop().await;

    assert!(
        sched.ring.count_outcome(Outcome::Skipped) >= 10,
        "skips {}",
        sched.ring.count_outcome(Outcome::Skipped)
    );
    // Never more than the cap plus one in-flight task's worth.
    assert!(
        sched.governor.used_bytes() <= 5_000_000 + 300_000,
        "window bytes {}",
        sched.governor.used_bytes()
    );
    assert_eq!(sched.stats.snapshot().errors, 0);
}

#[tokio::test(start_paused = true)]
async fn s3_paranoid_saturates_but_never_exceeds_slots() {
    let sched = scheduler(
        search_only_config(Intensity::Paranoid, 50, 3),
        StubPool::new(300_000, Duration::from_secs(30)),
        0xC3,
    );
    sched.set_profile(IntensityProfile::constant(300.0));
    sched.run();

    let mut max_active = 0usize;
    let mut sum = 0usize;
    let mut samples = 0usize;
    for i in 0..360 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let active = sched.sessions.active();
        max_active = max_active.max(active);
        // Skip the cold start when measuring steady state.
        if i >= 30 {
            sum += active;
            samples += 1;
        }
    }
    assert!(max_active <= 3, "active exceeded slots: {max_active}");
    let avg = sum as f64 / samples as f64;
    assert!(avg >= 2.0, "steady-state average {avg:.2} too low");

    sched.stop().await;
    assert_eq!(sched.sessions.active(), 0, "sessions survived the grace window");
    assert_eq!(sched.sessions.slot_leaks(), 0);
}

#[tokio::test(start_paused = true)]
async fn s4_flaky_driver_counts_errors_without_leaking() {
    let sched = scheduler(
        search_only_config(Intensity::Medium, 50, 2),
        StubPool::new(300_000, Duration::from_secs(2)).failing_every(3),
        0xD4,
    );
    sched.set_profile(IntensityProfile::constant(60.0));
    sched.run();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    sched.stop().await;

    let requests = sched.engines.requests(EngineKind::Search);
    let errors = sched.engines.errors(EngineKind::Search);
    assert!(requests > 30, "requests {requests}");
    let ratio = errors as f64 / requests as f64;
    assert!(
        (0.2..=0.45).contains(&ratio),
        "error ratio {ratio:.3} (errors {errors}, requests {requests})"
    );

    sched.sessions.audit();
    assert_eq!(sched.sessions.slot_leaks(), 0);
    assert_eq!(sched.sessions.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn s5_away_only_gates_events_on_presence() {
    let mut config = search_only_config(Intensity::Medium, 50, 2);
    config.schedule_mode = ScheduleMode::AwayOnly;
    let sched = scheduler(config, StubPool::new(300_000, Duration::from_secs(2)), 0xE5);
    sched.set_profile(IntensityProfile::constant(120.0));
    sched.run();

    // Presence starts home: gate closed under away_only.
    assert!(!sched.gate_open());

    let mut away_sessions = 0u64;
    for window in 0..6 {
        let away = window % 2 == 0;
        sched.set_presence(!away);
        // Let admissions from the previous window settle before counting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = sched.stats.snapshot().sessions;
        tokio::time::sleep(Duration::from_secs(600)).await;
        let delta = sched.stats.snapshot().sessions - before;
        if away {
            assert!(delta > 0, "no sessions during away window {window}");
            away_sessions += delta;
        } else {
            assert_eq!(delta, 0, "phantom sessions during home window {window}");
        }
    }
    assert!(away_sessions > 0);

    sched.stop().await;
    assert_eq!(sched.sessions.active(), 0);
    assert_eq!(sched.sessions.slot_leaks(), 0);
}

#[tokio::test(start_paused = true)]
async fn persona_stays_pinned_for_session_lifetime() {
    // One persona in the pool: every activity line must carry it; more
    // importantly, dispatch never swaps personas mid-session (the session
    // runner owns an Arc for its whole life).
    let mut t = tables();
    t.personas = vec![persona("only-one", DeviceClass::Desktop, (1920, 1080))];
    let data = Arc::new(DataStore::from_tables(t));
    let sched = Scheduler::new(
        search_only_config(Intensity::Medium, 50, 1),
        data,
        Arc::new(StubPool::new(300_000, Duration::from_secs(2))),
        RngSeed(0xF6),
        CancellationToken::new(),
    );
    sched.set_profile(IntensityProfile::constant(60.0));
    sched.run();
    tokio::time::sleep(Duration::from_secs(1200)).await;
    sched.stop().await;

    assert_eq!(sched.current_persona().as_deref(), Some("only-one"));
    assert!(sched.stats.snapshot().sessions > 0);
}

#[tokio::test(start_paused = true)]
async fn safety_default_engines_stay_silent() {
    // Default config: tor/research/adclick disabled; their stats must be
    // zero after an hour of traffic. (DNS is kept off so the test touches
    // no real resolver.)
    let config = Config {
        enable_dns_noise: false,
        ..Config::default()
    };
    let sched = scheduler(config, StubPool::new(300_000, Duration::from_secs(2)), 0xF7);
    sched.set_profile(IntensityProfile::constant(120.0));
    sched.run();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    sched.stop().await;

    for kind in [EngineKind::Tor, EngineKind::Research, EngineKind::Adclick] {
        assert_eq!(sched.engines.requests(kind), 0, "{kind} ran while disabled");
        assert_eq!(sched.engines.errors(kind), 0);
    }
    assert!(sched.stats.snapshot().sessions > 0);
}
