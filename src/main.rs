//! Poisson — decoy network traffic generator

use clap::Parser;
use poisson_core::{Config, DataStore};
use poisson_engine::driver::StubPool;
use poisson_engine::Scheduler;
use poisson_gateway::{start_gateway, GatewayConfig};
use poisson_timing::RngSeed;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(name = "poisson", about = "Poisson — decoy traffic noise generator")]
struct Cli {
    /// Host-supplied options blob
    #[arg(long, default_value = "/data/options.json")]
    options: PathBuf,

    /// Directory holding the YAML data files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Control-plane port
    #[arg(short, long, default_value_t = 8099)]
    port: u16,

    /// Bind to loopback only
    #[arg(long)]
    loopback: bool,

    /// Master RNG seed (default: entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Disable control-plane auth (development)
    #[arg(long)]
    no_auth: bool,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "poisson=info,tower_http=info".into());

    // Operator log on stdout; the activity stream as JSON lines on stderr.
    let operator_layer = tracing_subscriber::fmt::layer()
        .with_filter(filter::filter_fn(|meta| meta.target() != "activity"))
        .with_filter(env_filter);
    let activity_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(filter::filter_fn(|meta| meta.target() == "activity"));

    tracing_subscriber::registry()
        .with(operator_layer)
        .with(activity_layer)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = match Config::load(&cli.options) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    };

    let data = match DataStore::load(&cli.data_dir) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    };

    let seed = cli.seed.map(RngSeed).unwrap_or_else(RngSeed::from_entropy);
    let cancel = CancellationToken::new();

    // The page driver is an external collaborator; the stub stands in
    // until a real headless browser is wired behind DriverPool.
    let drivers = Arc::new(StubPool::new(400_000, Duration::from_secs(2)));

    let scheduler = Scheduler::new(
        config.clone(),
        data.clone(),
        drivers,
        seed,
        cancel.child_token(),
    );
    scheduler.run();
    info!(
        intensity = config.intensity.as_str(),
        max_sessions = config.max_concurrent_sessions,
        bandwidth_mb = config.max_bandwidth_mb_per_hour,
        "poisson v{} started",
        env!("CARGO_PKG_VERSION")
    );

    let gateway_config = GatewayConfig {
        port: cli.port,
        bind_loopback: cli.loopback,
        ext_bearer: std::env::var("POISSON_EXT_TOKEN").ok(),
        no_auth: cli.no_auth,
    };
    let gateway_cancel = cancel.child_token();
    let gateway_scheduler = scheduler.clone();
    let gateway = tokio::spawn(async move {
        if let Err(e) = start_gateway(gateway_config, gateway_scheduler, gateway_cancel).await {
            error!("gateway failed: {e}");
        }
    });

    wait_for_shutdown(&data, &scheduler).await;

    scheduler.stop().await;
    cancel.cancel();
    let _ = gateway.await;
    info!("clean shutdown");
}

/// Block until SIGINT/SIGTERM; reload data tables on SIGHUP.
async fn wait_for_shutdown(data: &Arc<DataStore>, scheduler: &poisson_engine::SchedulerHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("signal handler");
        let mut hup = signal(SignalKind::hangup()).expect("signal handler");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return,
                _ = term.recv() => return,
                _ = hup.recv() => {
                    match data.reload() {
                        Ok(()) => {
                            scheduler.personas.replace_pool(data.snapshot().personas.clone());
                            info!("data tables reloaded");
                        }
                        Err(e) => error!("reload failed, keeping previous snapshot: {e}"),
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
