//! Ledger HTTP Client - Rate-limited REST API Client
//!
//! Wraps reqwest with concurrency limiting, retries, and HMAC
//! authentication for all ledger REST API interactions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::auth::LedgerAuth;

/// Configuration for the ledger HTTP client.
#[derive(Debug, Clone)]
pub struct LedgerClientConfig {
  /// Base URL for the ledger API.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
}

impl Default for LedgerClientConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:7700".to_string(),
      timeout: Duration::from_secs(30),
      max_concurrent: 4,
      max_retries: 3,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

/// Concurrency-limited HTTP client for the ledger API.
pub struct LedgerClient {
  /// Underlying HTTP client.
  http: Client,
  /// Authentication manager.
  auth: Arc<LedgerAuth>,
  /// Client configuration.
  config: LedgerClientConfig,
  /// Concurrency limiter.
  semaphore: Arc<Semaphore>,
}

impl LedgerClient {
  /// Create a new ledger client.
  pub fn new(auth: Arc<LedgerAuth>, config: LedgerClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build ledger HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

    Ok(Self {
      http,
      auth,
      config,
      semaphore,
    })
  }

  /// Execute a GET request with auth headers.
  pub async fn get(&self, path: &str) -> Result<Response> {
    let url = format!("{}{}", self.config.base_url, path);
    let request = self.http.get(&url);
    self.execute_with_retry(request, "GET", path, "").await
  }

  /// Execute a POST request with auth headers.
  pub async fn post(&self, path: &str, body: &str) -> Result<Response> {
    let url = format!("{}{}", self.config.base_url, path);
    let request = self
      .http
      .post(&url)
      .header("Content-Type", "application/json")
      .body(body.to_string());
    self.execute_with_retry(request, "POST", path, body).await
  }

  /// Execute request with authentication, concurrency limiting, and
  /// retries. The caller embeds an idempotency key in the body, so a
  /// retried POST cannot double-apply at the ledger.
  async fn execute_with_retry(
    &self,
    request: RequestBuilder,
    method: &str,
    path: &str,
    body: &str,
  ) -> Result<Response> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .context("Semaphore closed")?;

    let mut last_error = None;

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis(), "Retrying ledger request");
        sleep(delay).await;
      }

      let timestamp = LedgerAuth::timestamp();

      let mut req = request
        .try_clone()
        .context("Failed to clone request")?;

      req = req
        .header("X-LEDGER-KEY", self.auth.api_key())
        .header("X-LEDGER-TIMESTAMP", &timestamp)
        .header(
          "X-LEDGER-SIGNATURE",
          self.auth.sign(&timestamp, method, path, body),
        );

      match req.send().await {
        Ok(response) => match response.status() {
          StatusCode::OK | StatusCode::CREATED => return Ok(response),
          StatusCode::TOO_MANY_REQUESTS => {
            warn!("Rate limited by ledger API, backing off");
            sleep(Duration::from_secs(2)).await;
            last_error = Some(anyhow::anyhow!("Rate limited"));
            continue;
          }
          status if status.is_server_error() => {
            warn!(status = %status, "Ledger server error, retrying");
            last_error = Some(anyhow::anyhow!("Server error: {status}"));
            continue;
          }
          status => {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ledger API error {status}: {body}"));
          }
        },
        Err(e) => {
          warn!(error = %e, attempt, "Ledger request failed");
          last_error = Some(e.into());
          continue;
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
  }
}
