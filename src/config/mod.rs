//! Configuration Module - TOML-based Engine Configuration
//!
//! Loads and validates configuration from `config.toml`. All lifecycle
//! windows, rake/jackpot policy, scoring constants, and adapter
//! endpoints are externalized here - nothing is hardcoded in the
//! domain layer.

pub mod loader;

use serde::Deserialize;

use crate::domain::scoring::ScoringParams;

/// Top-level engine configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any background loop starts.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and metadata.
  pub service: ServiceConfig,
  /// Race lifecycle timing and rake policy.
  pub engine: EngineConfig,
  /// Performance scoring constants.
  #[serde(default)]
  pub scoring: ScoringParams,
  /// Price source adapter settings.
  pub prices: PricesConfig,
  /// Ledger (transfer executor) adapter settings.
  pub ledger: LedgerConfig,
  /// Persistence configuration.
  pub persistence: PersistenceConfig,
  /// Metrics and monitoring.
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Race lifecycle timing and rake policy.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// Grace interval between lock and measurement start (seconds).
  #[serde(default = "default_grace_seconds")]
  pub grace_seconds: u64,
  /// Full measured window, anchored at lock time (seconds).
  #[serde(default = "default_progress_seconds")]
  pub progress_window_seconds: u64,
  /// Reconciliation sweep interval (seconds, not minutes).
  #[serde(default = "default_sweep_seconds")]
  pub sweep_interval_seconds: u64,
  /// Scheduler re-scan interval for arming timers (seconds).
  #[serde(default = "default_poll_seconds")]
  pub timer_poll_seconds: u64,
  /// Display price refresh interval for live races (seconds).
  #[serde(default = "default_price_poll_seconds")]
  pub price_poll_seconds: u64,
  /// Treasury share of the rake in basis points; the jackpot accrues
  /// the remainder.
  #[serde(default = "default_rake_split_bps")]
  pub rake_split_treasury_bps: u32,
  /// Recipient address for the treasury share of the rake.
  pub treasury_recipient: String,
}

/// Price source adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PricesConfig {
  /// Price API base URL.
  pub base_url: String,
  /// Cache TTL for spot prices (seconds).
  #[serde(default = "default_price_ttl")]
  pub cache_ttl_seconds: u64,
  /// Per-request timeout (seconds).
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Maximum retries on transient errors.
  #[serde(default = "default_retries")]
  pub max_retries: u32,
  /// Base delay between retries, doubled each attempt (milliseconds).
  #[serde(default = "default_retry_delay_ms")]
  pub retry_base_delay_ms: u64,
}

/// Ledger service settings (outbound transfers).
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
  /// Ledger REST API base URL.
  pub base_url: String,
  /// Per-request timeout (seconds).
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Maximum retries on transient errors.
  #[serde(default = "default_retries")]
  pub max_retries: u32,
  /// Base delay between retries, doubled each attempt (milliseconds).
  #[serde(default = "default_retry_delay_ms")]
  pub retry_base_delay_ms: u64,
  /// Maximum concurrent requests to the ledger.
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent: usize,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for the state snapshot and JSONL journals.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_grace_seconds() -> u64 {
  15
}

fn default_progress_seconds() -> u64 {
  300
}

fn default_sweep_seconds() -> u64 {
  5
}

fn default_poll_seconds() -> u64 {
  2
}

fn default_price_poll_seconds() -> u64 {
  10
}

fn default_rake_split_bps() -> u32 {
  6000
}

fn default_price_ttl() -> u64 {
  5
}

fn default_timeout() -> u64 {
  30
}

fn default_retries() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  200
}

fn default_max_concurrent() -> usize {
  4
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
