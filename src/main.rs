//! Crypto Derby — Entry Point
//!
//! Initializes configuration, logging, adapters, and the race
//! lifecycle loops. Runs until SIGINT/SIGTERM.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Load ledger auth from env vars (LEDGER_API_KEY, LEDGER_API_SECRET)
//! 4. Create LedgerClient (HTTP + auth + retry + concurrency limit)
//! 5. Create LedgerTransferExecutor (implements TransferExecutor port)
//! 6. Create CoinGeckoPriceSource (cached USD spot prices)
//! 7. Open RaceRepositoryImpl (snapshot + journals, hydrated from disk)
//! 8. Wire SettlementEngine + RaceStateMachine
//! 9. Spawn health server, metrics server, and health/metrics monitors
//! 10. Spawn scheduler (per-race timers) + reconciliation sweep
//! 11. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod adapters;
mod config;
mod domain;
mod ports;
mod usecases;

use adapters::ledger::{LedgerAuth, LedgerClient, LedgerClientConfig, LedgerTransferExecutor};
use adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use adapters::persistence::RaceRepositoryImpl;
use adapters::prices::CoinGeckoPriceSource;
use domain::distribution::RakeSplit;
use domain::race::RaceWindows;
use ports::price_source::PriceSource;
use ports::repository::RaceRepository;
use ports::transfer::TransferExecutor;
use usecases::reconciler::ReconciliationSweep;
use usecases::scheduler::{RaceScheduler, SchedulerConfig};
use usecases::settlement::{SettlementConfig, SettlementEngine};
use usecases::state_machine::RaceStateMachine;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config = config::loader::load_config("config.toml")
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.service.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        grace_secs = config.engine.grace_seconds,
        progress_secs = config.engine.progress_window_seconds,
        "Starting Crypto Derby race engine"
    );

    // ── 3. Shutdown signal channel ──────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 4. Ledger client with auth from env vars ────────────
    let auth = Arc::new(
        LedgerAuth::from_env().context("Failed to load ledger credentials from env")?,
    );
    let ledger_config = LedgerClientConfig {
        base_url: config.ledger.base_url.clone(),
        timeout: Duration::from_secs(config.ledger.timeout_seconds),
        max_concurrent: config.ledger.max_concurrent,
        max_retries: config.ledger.max_retries,
        retry_base_delay: Duration::from_millis(config.ledger.retry_base_delay_ms),
    };
    let ledger_client = Arc::new(
        LedgerClient::new(Arc::clone(&auth), ledger_config)
            .context("Failed to create ledger client")?,
    );

    // ── 5. Transfer executor (TransferExecutor port) ────────
    let executor = Arc::new(LedgerTransferExecutor::new(Arc::clone(&ledger_client)));

    // ── 6. Price source (PriceSource port) ──────────────────
    let prices = Arc::new(
        CoinGeckoPriceSource::new(&config.prices)
            .context("Failed to create price source")?,
    );

    // ── 7. Repository (snapshot + journals) ─────────────────
    let repo = Arc::new(
        RaceRepositoryImpl::from_data_dir(&config.persistence.data_dir)
            .await
            .context("Failed to open repository")?,
    );

    // ── 8. Settlement engine + state machine ────────────────
    let engine = Arc::new(SettlementEngine::new(
        Arc::clone(&repo),
        Arc::clone(&executor),
        SettlementConfig {
            rake_split: RakeSplit {
                treasury_bps: config.engine.rake_split_treasury_bps,
            },
            treasury_recipient: config.engine.treasury_recipient.clone(),
            scoring: config.scoring,
        },
    ));

    let windows = RaceWindows {
        grace: chrono::Duration::seconds(config.engine.grace_seconds as i64),
        progress: chrono::Duration::seconds(config.engine.progress_window_seconds as i64),
    };
    let state_machine = Arc::new(RaceStateMachine::new(
        Arc::clone(&repo),
        Arc::clone(&prices),
        Arc::clone(&engine),
        windows,
    ));

    // ── 9. Health + metrics servers and monitors ────────────
    let health_state = Arc::new(HealthState::new());
    let health_server = HealthServer::new(Arc::clone(&health_state), config.metrics.health_port);
    let health_handle = tokio::spawn(health_server.run(shutdown_tx.subscribe()));

    let mut metrics_handle = None;
    if config.metrics.enabled {
        let registry = Arc::new(MetricsRegistry::new().context("Failed to create metrics")?);
        metrics_handle = Some(tokio::spawn(
            Arc::clone(&registry).serve(config.metrics.bind_address.clone(), shutdown_tx.subscribe()),
        ));
        tokio::spawn(refresh_metrics(
            Arc::clone(&repo),
            registry,
            shutdown_tx.subscribe(),
        ));
    }

    tokio::spawn(monitor_health(
        Arc::clone(&repo),
        Arc::clone(&prices),
        Arc::clone(&executor),
        Arc::clone(&health_state),
        shutdown_tx.subscribe(),
    ));

    // ── 10. Scheduler + reconciliation sweep ────────────────
    let scheduler = Arc::new(RaceScheduler::new(
        Arc::clone(&state_machine),
        Arc::clone(&repo),
        SchedulerConfig {
            poll_interval: Duration::from_secs(config.engine.timer_poll_seconds),
            price_poll_interval: Duration::from_secs(config.engine.price_poll_seconds),
        },
    ));
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let sweep = Arc::new(ReconciliationSweep::new(
        Arc::clone(&state_machine),
        Arc::clone(&repo),
        Duration::from_secs(config.engine.sweep_interval_seconds),
    ));
    let sweep_handle = tokio::spawn(sweep.run(shutdown_tx.subscribe()));

    info!("All tasks spawned — engine is running");

    // ── 11. Wait for SIGINT or SIGTERM ──────────────────────
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT received, initiating graceful shutdown");
        }
    }

    // Signal all tasks to stop.
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to all tasks");

    // In-flight transitions finish inside the loops; give them time.
    let _ = tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(30), sweep_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Periodically refresh gauge metrics from repository state.
async fn refresh_metrics(
    repo: Arc<RaceRepositoryImpl>,
    registry: Arc<MetricsRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    use rust_decimal::prelude::ToPrimitive;

    let mut tick = tokio::time::interval(Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tick.tick() => {
                if let Ok(races) = repo.list_non_terminal_races().await {
                    for status in ["OPEN", "LOCKED", "IN_PROGRESS"] {
                        let count = races
                            .iter()
                            .filter(|r| r.status.to_string() == status)
                            .count();
                        registry
                            .active_races
                            .with_label_values(&[status])
                            .set(count as f64);
                    }
                }
                if let Ok(treasury) = repo.load_treasury().await {
                    for (currency, balance) in &treasury.jackpot_balances {
                        registry
                            .jackpot_balance
                            .with_label_values(&[&currency.to_string()])
                            .set(balance.to_f64().unwrap_or(0.0));
                    }
                }
            }
        }
    }
}

/// Periodically probe adapter health for the readiness endpoint.
async fn monitor_health(
    repo: Arc<RaceRepositoryImpl>,
    prices: Arc<CoinGeckoPriceSource>,
    executor: Arc<LedgerTransferExecutor>,
    state: Arc<HealthState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    use std::sync::atomic::Ordering;

    let mut tick = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tick.tick() => {
                let repo_ok = repo.is_healthy().await;
                let prices_ok = prices.is_healthy().await;
                let ledger_ok = executor.is_healthy().await;

                state.repository_healthy.store(repo_ok, Ordering::Relaxed);
                state.prices_healthy.store(prices_ok, Ordering::Relaxed);
                state.ledger_healthy.store(ledger_ok, Ordering::Relaxed);

                if !repo_ok {
                    error!("Repository unhealthy — readiness probe will fail");
                } else if !prices_ok || !ledger_ok {
                    warn!(
                        prices = prices_ok,
                        ledger = ledger_ok,
                        "Degraded adapter health"
                    );
                }
            }
        }
    }
}
