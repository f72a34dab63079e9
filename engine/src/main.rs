// kioskplay engine: HTTP control plane for a single mpv playback session,
// plus a watchdog that restarts monitored streams when they stall.

mod api;
mod config;
mod ipc;
mod player;
mod presets;
mod process;
mod watchdog;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::api::{build_router, AppState};
use crate::config::Config;
use crate::ipc::MpvIpc;
use crate::player::Supervisor;
use crate::process::MpvProcess;
use crate::watchdog::{HttpPlayerApi, SysinfoProbe, Watchdog, WatchdogStats};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION").to_string();
    let cfg = Config::from_env()?;

    info!(
        "media dir {}, display {}x{}",
        cfg.player.media_dir.display(),
        cfg.player.display.width,
        cfg.player.display.height
    );

    let presets = presets::load_presets_or_default(cfg.db_path.clone()).await;

    let supervisor = Supervisor::new(
        cfg.player.clone(),
        MpvIpc::new(cfg.player.socket_path.clone()),
        MpvProcess::new(cfg.mpv.clone()),
    );

    let stats = Arc::new(Mutex::new(WatchdogStats::default()));

    let state = AppState {
        version: version.clone(),
        supervisor: Arc::new(Mutex::new(supervisor)),
        presets: Arc::new(Mutex::new(presets)),
        db_path: cfg.db_path.clone(),
        watchdog: stats.clone(),
    };

    if cfg.watchdog_enabled {
        let api = HttpPlayerApi::new(cfg.watchdog.api_base.clone());
        let probe = SysinfoProbe::new(cfg.watchdog.process_name.clone());
        tokio::spawn(Watchdog::new(cfg.watchdog.clone(), api, probe, stats).run());
    } else {
        info!("watchdog disabled");
    }

    let supervisor = state.supervisor.clone();
    let app = build_router(state);

    info!("kioskplay engine {version} starting on http://{}", cfg.bind);

    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // No player process outlives the service.
    supervisor.lock().await.stop().await;
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
