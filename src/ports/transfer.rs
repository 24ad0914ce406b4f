//! Transfer Executor Port - Outbound Value Transfer Interface
//!
//! Defines the trait for sending value to a recipient address: winner
//! payouts, rake to the treasury, and refunds. The executor does not
//! need to be idempotent — the settlement engine guards every logical
//! transfer with a `SettlementTransfer` record before calling `send`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::race::Currency;

/// Durable proof that a transfer was accepted by the external ledger.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
  /// Ledger-assigned receipt / transaction identifier.
  pub receipt_id: String,
  /// When the ledger confirmed the transfer.
  pub confirmed_at: DateTime<Utc>,
}

/// Trait for outbound transfer providers.
///
/// "No confirmation within budget" MUST surface as an error — the
/// settlement engine records it as FAILED and retries later; it never
/// assumes success.
#[async_trait]
pub trait TransferExecutor: Send + Sync + 'static {
  /// Send `amount` of `currency` to `recipient`.
  ///
  /// # Errors
  /// Returns error when the ledger rejects the transfer or does not
  /// confirm it within the adapter's timeout/retry budget.
  async fn send(
    &self,
    recipient: &str,
    amount: Decimal,
    currency: Currency,
  ) -> anyhow::Result<TransferReceipt>;

  /// Check if the ledger connection is healthy.
  async fn is_healthy(&self) -> bool;
}
