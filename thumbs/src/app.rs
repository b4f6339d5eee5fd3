//! Startup and shutdown wiring.

use std::sync::Arc;

use thumbs_engine::QualityRaceResolver;
use thumbs_engine::monitor::{GluetunRemediator, HealthMonitor, SystemEgressCounter};
use thumbs_engine::resolver::{CandidateList, RandomSource};
use thumbs_engine::transport::build_control_client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vid_codec::IdCodec;

use crate::Result;
use crate::api::{ApiServer, AppState};
use crate::config::{MonitorSettings, RuntimeConfig};

/// Builds every component from `config` and serves until `shutdown` fires.
///
/// On the way out the monitor is stopped and detached upstream attempts
/// are drained.
pub async fn run(config: RuntimeConfig, shutdown: CancellationToken) -> Result<()> {
    let profile = config.transport.build()?;
    let resolver = QualityRaceResolver::with_profile(
        profile,
        CandidateList::default(),
        Arc::new(RandomSource::from_entropy()),
    );
    let state = AppState::new(
        IdCodec::new(&config.secret_key),
        resolver,
        config.litespeed_cache,
    );

    let monitor = match &config.monitor {
        Some(settings) => start_monitor(settings, shutdown.child_token())?,
        None => {
            info!("Block checker disabled");
            None
        }
    };

    let server = ApiServer::new(config.listen.clone(), state.clone(), shutdown);
    let served = server.run().await;

    if let Some(monitor) = &monitor {
        monitor.shutdown().await;
    }
    state.resolver.drain().await;
    info!("Shutdown complete");

    served
}

fn start_monitor(
    settings: &MonitorSettings,
    cancel: CancellationToken,
) -> Result<Option<HealthMonitor>> {
    let Some(counter) = SystemEgressCounter::new() else {
        warn!("Network statistics unavailable on this host; block checker disabled");
        return Ok(None);
    };

    let remediator = Arc::new(GluetunRemediator::new(
        build_control_client()?,
        &settings.controller,
    ));
    match HealthMonitor::start(settings.config, counter, remediator, cancel) {
        Ok(monitor) => Ok(Some(monitor)),
        Err(e) => {
            warn!(error = %e, "Block checker disabled");
            Ok(None)
        }
    }
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
pub fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use clap::Parser;
    use tokio::net::UnixStream;

    use crate::config::AppConfig;

    #[tokio::test]
    async fn serves_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("app.sock");
        let config = AppConfig::try_parse_from([
            "thumbs",
            "--secret-key",
            "ABCDEFGHIJKLMNOP",
            "--http",
            "false",
            "--uds",
            "true",
            "-s",
            socket.to_str().unwrap(),
            "--block-checker",
            "false",
        ])
        .unwrap()
        .validate()
        .unwrap();

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(run(config, shutdown.clone()));

        let mut connected = false;
        for _ in 0..200 {
            if UnixStream::connect(&socket).await.is_ok() {
                connected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(connected);

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }
}
