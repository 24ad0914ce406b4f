//! CoinGecko Price Adapter - USD Spot Prices with Caching
//!
//! Implements the `PriceSource` port against the CoinGecko simple-price
//! REST API. A short-TTL in-memory cache keeps the lock/settle bursts
//! (one fetch per runner) from hammering the provider, and bounded
//! retries with exponential backoff absorb transient failures.
//!
//! Any error surfacing from here means "unavailable" to the core, which
//! degrades the affected runner instead of failing the transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::PricesConfig;
use crate::ports::price_source::{PriceQuote, PriceSource};

/// Consecutive failures before the adapter reports unhealthy.
const UNHEALTHY_AFTER_FAILURES: u32 = 5;

/// CoinGecko-backed price source with an in-memory spot cache.
pub struct CoinGeckoPriceSource {
    /// Underlying HTTP client.
    http: Client,
    /// API base URL (e.g. https://api.coingecko.com/api/v3).
    base_url: String,
    /// Last observed quote per asset.
    cache: RwLock<HashMap<String, PriceQuote>>,
    /// How long a cached quote stays fresh.
    cache_ttl: chrono::Duration,
    /// Maximum retries on transient errors.
    max_retries: u32,
    /// Base delay between retries (exponential backoff).
    retry_base_delay: Duration,
    /// Consecutive fetch failures, for health reporting.
    consecutive_failures: AtomicU32,
}

impl CoinGeckoPriceSource {
    /// Create a new price source from configuration.
    pub fn new(config: &PricesConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to build price HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cache: RwLock::new(HashMap::new()),
            cache_ttl: chrono::Duration::seconds(config.cache_ttl_seconds as i64),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    /// Fetch a spot price from the API with retries.
    async fn fetch(&self, asset_id: &str) -> Result<Decimal> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, asset_id
        );

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(asset_id, attempt, delay_ms = delay.as_millis(), "Retrying price fetch");
                sleep(delay).await;
            }

            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body: HashMap<String, HashMap<String, Decimal>> = response
                        .json()
                        .await
                        .context("Failed to parse price response")?;

                    let price = body
                        .get(asset_id)
                        .and_then(|quotes| quotes.get("usd"))
                        .copied()
                        .with_context(|| format!("No USD quote for asset {asset_id}"))?;

                    return Ok(price);
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(asset_id, status = %status, attempt, "Price API returned error status");
                    last_error = Some(anyhow::anyhow!("price API status {status}"));
                }
                Err(e) => {
                    warn!(asset_id, error = %e, attempt, "Price request failed");
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    async fn get_price(&self, asset_id: &str) -> Result<PriceQuote> {
        // Serve from cache while fresh.
        {
            let cache = self.cache.read().await;
            if let Some(quote) = cache.get(asset_id) {
                if Utc::now() - quote.as_of < self.cache_ttl {
                    return Ok(quote.clone());
                }
            }
        }

        match self.fetch(asset_id).await {
            Ok(price) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                let quote = PriceQuote {
                    asset_id: asset_id.to_string(),
                    usd_price: price,
                    as_of: Utc::now(),
                };
                self.cache
                    .write()
                    .await
                    .insert(asset_id.to_string(), quote.clone());
                Ok(quote)
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) < UNHEALTHY_AFTER_FAILURES
    }
}
