//! Price Source Port - Asset Price Lookup Interface
//!
//! Defines the trait for fetching current USD prices for tracked assets.
//! The core tolerates unavailability at every call site: a failed fetch
//! degrades the affected runner's eligibility, it never aborts a race
//! transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::race::AssetId;

/// A point-in-time USD price observation.
#[derive(Debug, Clone)]
pub struct PriceQuote {
  /// Asset the quote is for.
  pub asset_id: AssetId,
  /// Spot price in USD.
  pub usd_price: Decimal,
  /// When the provider observed this price.
  pub as_of: DateTime<Utc>,
}

/// Trait for price data providers.
///
/// Implementors own their transport, caching, and retry policy. Any
/// error returned here means "unavailable right now" to the core.
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
  /// Fetch the current USD price for an asset.
  ///
  /// # Errors
  /// Returns error when no price can be produced within the adapter's
  /// timeout/retry budget.
  async fn get_price(&self, asset_id: &str) -> anyhow::Result<PriceQuote>;

  /// Check if the provider connection is healthy.
  async fn is_healthy(&self) -> bool;
}
