use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use matchday_core::config::MatchdayConfig;
use matchday_records::RecordsProcessor;
use matchday_scheduler::{HttpTransport, SchedulingService, SystemClock};
use tracing::{info, warn};

mod app;
mod http;

/// Matchday gateway: schedules quota-limited football data imports.
#[derive(Parser, Debug)]
#[command(name = "matchday-gateway", version, about)]
struct Cli {
    /// Path to matchday.toml (defaults to MATCHDAY_CONFIG, then ~/.matchday/matchday.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address from the config file
    #[arg(long)]
    bind: Option<String>,

    /// Override the listen port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "matchday_gateway=info,matchday_scheduler=info,matchday_records=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // load config: --config > MATCHDAY_CONFIG env > ~/.matchday/matchday.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("MATCHDAY_CONFIG").ok());
    let config = MatchdayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        MatchdayConfig::default()
    });

    let bind = cli.bind.clone().unwrap_or_else(|| config.gateway.bind.clone());
    let port = cli.port.unwrap_or(config.gateway.port);

    // single SQLite file; the scheduler and the records writer each get a connection
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let conn = matchday_scheduler::db::open(db_path)?;
    let clock = Arc::new(SystemClock);
    let records = RecordsProcessor::open(db_path)?.with_clock(clock.clone());
    info!("database migrations complete");

    let transport = HttpTransport::new(&config.api)?;
    if config.api.resolved_api_key().is_none() {
        warn!("no API key configured; task creation will be rejected until one is set");
    }

    let scheduler = SchedulingService::new(
        conn,
        clock,
        Arc::new(transport),
        Arc::new(records),
        &config.scheduler,
    );
    let report = scheduler.recover()?;
    if report.timers_failed > 0 {
        warn!(count = report.timers_failed, "some stored schedules were not restored");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let loops = scheduler.spawn(shutdown_rx);

    let state = Arc::new(app::AppState::new(config, scheduler));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Matchday gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop the timer and worker loops; interrupted calls are failed on next start
    let _ = shutdown_tx.send(true);
    for handle in loops {
        let _ = handle.await;
    }
    info!("Matchday gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
