//! Ledger Transfer Executor - TransferExecutor Port Implementation
//!
//! Submits outbound transfers to the ledger service's REST API. Every
//! `send` call carries a freshly generated idempotency key that is
//! reused across HTTP retries within the call, so a timeout-then-retry
//! can never move the same value twice at the ledger. Dedup across
//! *calls* is the settlement engine's job via its transfer rows.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::client::LedgerClient;
use crate::domain::race::Currency;
use crate::ports::transfer::{TransferExecutor, TransferReceipt};

/// Request body for POST /transfers.
#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    recipient: &'a str,
    amount: Decimal,
    currency: String,
    idempotency_key: Uuid,
}

/// Response body from POST /transfers.
#[derive(Debug, Deserialize)]
struct TransferResponse {
    receipt_id: String,
    confirmed_at: Option<DateTime<Utc>>,
}

/// `TransferExecutor` adapter backed by the ledger HTTP client.
pub struct LedgerTransferExecutor {
    client: Arc<LedgerClient>,
}

impl LedgerTransferExecutor {
    /// Create a new executor over an authenticated ledger client.
    pub fn new(client: Arc<LedgerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransferExecutor for LedgerTransferExecutor {
    #[instrument(skip(self))]
    async fn send(
        &self,
        recipient: &str,
        amount: Decimal,
        currency: Currency,
    ) -> Result<TransferReceipt> {
        let request = TransferRequest {
            recipient,
            amount,
            currency: currency.to_string(),
            idempotency_key: Uuid::new_v4(),
        };
        let body = serde_json::to_string(&request)
            .context("Failed to serialize transfer request")?;

        let response = self.client.post("/transfers", &body).await?;

        let parsed: TransferResponse = response
            .json()
            .await
            .context("Failed to parse transfer response")?;

        info!(
            recipient,
            receipt_id = %parsed.receipt_id,
            "Transfer confirmed by ledger"
        );

        Ok(TransferReceipt {
            receipt_id: parsed.receipt_id,
            confirmed_at: parsed.confirmed_at.unwrap_or_else(Utc::now),
        })
    }

    async fn is_healthy(&self) -> bool {
        self.client.get("/health").await.is_ok()
    }
}
