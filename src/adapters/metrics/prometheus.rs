//! Prometheus Metrics Registry - Race Engine Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers race transitions, settlement outcomes, transfer results,
//! jackpot balances, and price feed health.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Centralized Prometheus metrics for the race engine.
///
/// All metrics follow the naming convention `crypto_derby_*` and carry
/// labels for per-state / per-currency filtering.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Total race transitions applied, by target state and actor.
    pub transitions_applied: IntCounterVec,
    /// Total transitions rejected, by error kind.
    pub transitions_rejected: IntCounterVec,
    /// Settlement transfers by kind and outcome.
    pub transfers_total: IntCounterVec,
    /// Settlement pass duration (milliseconds).
    pub settlement_duration_ms: HistogramVec,
    /// Current jackpot balance per currency.
    pub jackpot_balance: GaugeVec,
    /// Non-terminal races right now, by status.
    pub active_races: GaugeVec,
    /// Price fetches by outcome (ok / unavailable).
    pub price_fetches: IntCounterVec,
    /// Sweep catch-up transitions (races healed by reconciliation).
    pub sweep_catchups: prometheus::IntCounter,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let transitions_applied = IntCounterVec::new(
            Opts::new(
                "crypto_derby_transitions_applied_total",
                "Race transitions applied",
            ),
            &["target", "actor"],
        )?;

        let transitions_rejected = IntCounterVec::new(
            Opts::new(
                "crypto_derby_transitions_rejected_total",
                "Race transitions rejected",
            ),
            &["reason"],
        )?;

        let transfers_total = IntCounterVec::new(
            Opts::new(
                "crypto_derby_transfers_total",
                "Settlement transfers by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;

        let settlement_duration_ms = HistogramVec::new(
            HistogramOpts::new(
                "crypto_derby_settlement_duration_ms",
                "Settlement pass duration in milliseconds",
            )
            .buckets(vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]),
            &["mode"],
        )?;

        let jackpot_balance = GaugeVec::new(
            Opts::new(
                "crypto_derby_jackpot_balance",
                "Current jackpot balance per currency",
            ),
            &["currency"],
        )?;

        let active_races = GaugeVec::new(
            Opts::new(
                "crypto_derby_active_races",
                "Non-terminal races by status",
            ),
            &["status"],
        )?;

        let price_fetches = IntCounterVec::new(
            Opts::new(
                "crypto_derby_price_fetches_total",
                "Price fetch attempts by outcome",
            ),
            &["outcome"],
        )?;

        let sweep_catchups = prometheus::IntCounter::new(
            "crypto_derby_sweep_catchups_total",
            "Transitions driven by the reconciliation sweep",
        )?;

        // Register all metrics
        registry.register(Box::new(transitions_applied.clone()))?;
        registry.register(Box::new(transitions_rejected.clone()))?;
        registry.register(Box::new(transfers_total.clone()))?;
        registry.register(Box::new(settlement_duration_ms.clone()))?;
        registry.register(Box::new(jackpot_balance.clone()))?;
        registry.register(Box::new(active_races.clone()))?;
        registry.register(Box::new(price_fetches.clone()))?;
        registry.register(Box::new(sweep_catchups.clone()))?;

        Ok(Self {
            registry,
            transitions_applied,
            transitions_rejected,
            transfers_total,
            settlement_duration_ms,
            jackpot_balance,
            active_races,
            price_fetches,
            sweep_catchups,
        })
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let registry = metrics_self.registry.clone();
                async move {
                    let encoder = TextEncoder::new();
                    let metric_families = registry.gather();
                    let mut buffer = Vec::new();
                    encoder.encode(&metric_families, &mut buffer).unwrap();
                    String::from_utf8(buffer).unwrap_or_default()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
