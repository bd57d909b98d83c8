mod engine;
mod routes;
mod state;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Parser;
use filler_core::{EventLevel, MachineDef};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::engine::MachineHandle;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "filler_daemon", about = "Filling-line production simulation daemon")]
struct Cli {
    #[arg(long, default_value_t = 3001)]
    port: u16,
    /// JSON file with `{"machines": [...]}`. Two default fillers when omitted.
    #[arg(long)]
    machines: Option<PathBuf>,
    #[arg(long, default_value = "http://localhost:5173")]
    cors_origin: String,
    #[arg(long, default_value = "normal", value_parser = ["normal", "debug"])]
    event_level: String,
    /// Start every machine as soon as the daemon is up.
    #[arg(long)]
    autostart: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_state(defs: &[MachineDef], event_level: EventLevel) -> AppState {
    let (event_tx, _) = tokio::sync::broadcast::channel(256);
    let machines = defs
        .iter()
        .map(|def| MachineHandle::new(def, event_tx.clone(), event_level))
        .collect();
    AppState {
        machines: Arc::new(machines),
        event_tx,
        event_level,
    }
}

async fn shutdown_signal(state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        return;
    }
    tracing::info!("shutting down, pausing machines");
    for machine in state.machines.iter() {
        machine.pause();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let defs = match &cli.machines {
        Some(path) => filler_world::load_machines(path)?,
        None => filler_world::default_machines(),
    };
    let event_level = match cli.event_level.as_str() {
        "debug" => EventLevel::Debug,
        _ => EventLevel::Normal,
    };
    let cors_origin: HeaderValue = cli
        .cors_origin
        .parse()
        .with_context(|| format!("invalid CORS origin: {}", cli.cors_origin))?;

    let state = build_state(&defs, event_level);
    for machine in state.machines.iter() {
        let view = machine.view();
        tracing::info!(
            machine = %machine.id(),
            name = %view.state.name,
            limit = view.state.limit,
            cycle_time_minutes = view.state.cycle_time_minutes,
            "machine loaded"
        );
        if cli.autostart {
            machine.start();
        }
    }

    let router = routes::make_router_with_cors(state.clone(), cors_origin);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("filler_daemon listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("server failed")
}
