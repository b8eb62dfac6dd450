//! Tor engine — browse-shaped traffic through the local SOCKS proxy
//!
//! When the proxy is unreachable the engine degrades to "tor offline" and
//! simply bows out of task production; nothing escalates.

use super::{Engine, EngineContext};
use poisson_core::{EngineKind, Task, TaskKind, TorStatus};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const EXPECTED_BYTES: u64 = 800_000;
const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TorEngine {
    status: watch::Receiver<TorStatus>,
}

impl TorEngine {
    pub fn new(status: watch::Receiver<TorStatus>) -> Self {
        Self { status }
    }
}

impl Engine for TorEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tor
    }

    fn produce_task(&self, ctx: &EngineContext<'_>, rng: &mut ChaCha8Rng) -> Option<Task> {
        if *self.status.borrow() != TorStatus::Connected {
            debug!(status = ?*self.status.borrow(), "tor engine bypassed");
            return None;
        }
        if ctx.tables.onion_sites.is_empty() {
            return None;
        }
        let url = ctx.tables.onion_sites[rng.gen_range(0..ctx.tables.onion_sites.len())].clone();
        Some(Task {
            engine: EngineKind::Tor,
            url,
            kind: TaskKind::Page,
            expected_bytes: EXPECTED_BYTES,
            post_delay_ms: rng.gen_range(2000..8000),
        })
    }
}

/// Spawn the SOCKS health probe. Returns the status channel; the probe
/// task exits on cancellation. With tor disabled no probing happens at
/// all and the status stays `Disabled`.
pub fn spawn_probe(
    enabled: bool,
    socks_addr: String,
    cancel: CancellationToken,
) -> watch::Receiver<TorStatus> {
    let initial = if enabled {
        TorStatus::Connecting
    } else {
        TorStatus::Disabled
    };
    let (tx, rx) = watch::channel(initial);
    if !enabled {
        return rx;
    }

    tokio::spawn(async move {
        loop {
            let status = match tokio::time::timeout(
                PROBE_TIMEOUT,
                tokio::net::TcpStream::connect(&socks_addr),
            )
            .await
            {
                Ok(Ok(_)) => TorStatus::Connected,
                _ => TorStatus::Offline,
            };
            if *tx.borrow() != status {
                info!(?status, "tor proxy status changed");
            }
            if tx.send(status).is_err() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::super::tests::{test_persona, test_tables, test_topic};
    use super::*;
    use poisson_timing::RngSeed;

    #[test]
    fn bypassed_unless_connected() {
        let tables = test_tables();
        let topic = test_topic("news_left");
        let persona = test_persona();
        let ctx = EngineContext {
            tables: &tables,
            topic: &topic,
            persona: &persona,
        };
        let mut rng = RngSeed(1).stream("tor");

        for status in [TorStatus::Disabled, TorStatus::Connecting, TorStatus::Offline] {
            let (_tx, rx) = watch::channel(status);
            assert!(TorEngine::new(rx).produce_task(&ctx, &mut rng).is_none());
        }

        let (_tx, rx) = watch::channel(TorStatus::Connected);
        let task = TorEngine::new(rx).produce_task(&ctx, &mut rng).unwrap();
        assert!(task.url.ends_with(".onion"));
    }

    #[tokio::test]
    async fn probe_disabled_stays_disabled() {
        let cancel = CancellationToken::new();
        let rx = spawn_probe(false, "127.0.0.1:9050".into(), cancel);
        assert_eq!(*rx.borrow(), TorStatus::Disabled);
    }

    #[tokio::test]
    async fn probe_reports_offline_when_unreachable() {
        let cancel = CancellationToken::new();
        // Nothing listens on this port in the test environment.
        let mut rx = spawn_probe(true, "127.0.0.1:1".into(), cancel.clone());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), TorStatus::Offline);
        cancel.cancel();
    }
}
