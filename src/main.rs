//! OMEN - Signal Intelligence Engine
//! Mission: Turn heterogeneous world data into neutral, audited signals
//! Philosophy: Ledger-first durability, calibrated confidence, no verdicts

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omen_engine::api::build_router;
use omen_engine::scheduler::Scheduler;
use omen_engine::{AppState, OmenConfig};

#[derive(Debug, Parser)]
#[command(name = "omen", about = "OMEN signal intelligence engine")]
struct Args {
    /// Run one fetch sweep across all sources and exit.
    #[arg(long)]
    generate_once: bool,

    /// Require live mode: fail startup if any enabled source is MOCK.
    #[arg(long)]
    live: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match OmenConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration invalid");
            std::process::exit(1);
        }
    };
    info!(env = config.env.as_str(), port = config.port, "starting OMEN engine");

    let state = AppState::build(config).context("failed to build application state")?;

    if args.live {
        if let Err(err) = state.registry.require_live_mode() {
            error!(error = %err, "live mode blocked");
            std::process::exit(1);
        }
        info!("live mode validated: all enabled sources are REAL");
    }

    if args.generate_once {
        let (reports, signal_ids) = state.fetch_and_process_all(25).await;
        let failed = reports.iter().filter(|r| r.status == "error").count();
        info!(
            signals = signal_ids.len(),
            sources = reports.len(),
            failed,
            "one-shot generation complete"
        );
        // 0 all good, 2 partial success, 1 nothing worked.
        let code = if failed == 0 {
            0
        } else if failed < reports.len() {
            2
        } else {
            1
        };
        std::process::exit(code);
    }

    let scheduler = Scheduler::start(state.clone());
    let bridge = state.broadcaster.spawn_broker_bridge();

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "HTTP surface listening");

    let router = build_router(state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!(error = %err, "server error");
    }

    scheduler.shutdown(&state).await;
    if let Some(bridge) = bridge {
        bridge.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omen_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
