//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config: AppConfig = toml::from_str(&content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;

  info!(
    grace_secs = config.engine.grace_seconds,
    progress_secs = config.engine.progress_window_seconds,
    sweep_secs = config.engine.sweep_interval_seconds,
    rake_split_bps = config.engine.rake_split_treasury_bps,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive durations where required
/// - Basis-point values within [0, 10000]
/// - Sensible scoring constants
/// - Non-empty endpoints and recipients
fn validate_config(config: &AppConfig) -> Result<()> {
  // Engine validation
  anyhow::ensure!(
    config.engine.progress_window_seconds > 0,
    "progress_window_seconds must be positive"
  );
  anyhow::ensure!(
    config.engine.grace_seconds < config.engine.progress_window_seconds,
    "grace_seconds ({}) must be shorter than progress_window_seconds ({})",
    config.engine.grace_seconds,
    config.engine.progress_window_seconds
  );
  anyhow::ensure!(
    config.engine.sweep_interval_seconds > 0,
    "sweep_interval_seconds must be positive"
  );
  anyhow::ensure!(
    config.engine.rake_split_treasury_bps <= 10_000,
    "rake_split_treasury_bps must be in [0, 10000], got {}",
    config.engine.rake_split_treasury_bps
  );
  anyhow::ensure!(
    !config.engine.treasury_recipient.is_empty(),
    "treasury_recipient must not be empty"
  );

  // Scoring validation
  anyhow::ensure!(
    config.scoring.loser_fraction >= 0.0 && config.scoring.loser_fraction <= 1.0,
    "loser_fraction must be in [0, 1], got {}",
    config.scoring.loser_fraction
  );
  anyhow::ensure!(
    config.scoring.efficiency_cap > 0.0,
    "efficiency_cap must be positive"
  );
  anyhow::ensure!(
    config.scoring.loser_floor >= 0.0,
    "loser_floor must be non-negative"
  );

  // Adapter validation
  anyhow::ensure!(
    !config.prices.base_url.is_empty(),
    "price API base URL must not be empty"
  );
  anyhow::ensure!(
    !config.ledger.base_url.is_empty(),
    "ledger API base URL must not be empty"
  );
  anyhow::ensure!(
    config.ledger.max_concurrent > 0,
    "ledger max_concurrent must be positive"
  );

  Ok(())
}
