//! Repository Port - Race Persistence Interface
//!
//! Defines the trait for persisting races, bets, settlement transfers,
//! treasury state, and per-wallet results. The core never issues
//! partial-field updates: it reads a full race, mutates in memory, and
//! writes the full race back (last-writer-wins at race granularity).
//!
//! The repository also owns the "current live race" slot — the atomic
//! conditional write backing the single-live-race invariant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::race::{Bet, Currency, CurrencyAmount, Race, RaceId, Wallet};

/// What a settlement transfer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
  /// Winner's share of the prize pool.
  Payout,
  /// Treasury share of the rake.
  Rake,
  /// Stake returned on cancellation or no-winner settlement.
  Refund,
}

impl std::fmt::Display for TransferKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Payout => write!(f, "PAYOUT"),
      Self::Rake => write!(f, "RAKE"),
      Self::Refund => write!(f, "REFUND"),
    }
  }
}

/// Outcome status of a settlement transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
  /// Row written, executor call not yet resolved.
  Pending,
  /// Ledger confirmed; never paid again.
  Success,
  /// Ledger rejected or timed out; eligible for retry.
  Failed,
}

/// An outbound payment record: audit trail and idempotency guard.
///
/// At most one row exists per (race, recipient, kind, currency);
/// re-settlement skips any row already marked `Success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementTransfer {
  /// Internal row id.
  pub id: Uuid,
  /// Race this transfer settles.
  pub race_id: RaceId,
  /// Destination wallet (or the treasury recipient for rake).
  pub recipient: Wallet,
  /// Amount to move.
  pub amount: Decimal,
  /// Transfer currency.
  pub currency: Currency,
  /// What the transfer is for.
  pub kind: TransferKind,
  /// Current outcome status.
  pub status: TransferStatus,
  /// Ledger receipt id once confirmed.
  pub receipt_id: Option<String>,
  /// Failure detail when status is `Failed`.
  pub error: Option<String>,
  /// When the row was first written.
  pub created_at: DateTime<Utc>,
  /// When the status last changed.
  pub updated_at: DateTime<Utc>,
}

impl SettlementTransfer {
  /// Create a fresh `Pending` row for one logical transfer.
  pub fn pending(
    race_id: impl Into<RaceId>,
    recipient: impl Into<Wallet>,
    amount: Decimal,
    currency: Currency,
    kind: TransferKind,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      race_id: race_id.into(),
      recipient: recipient.into(),
      amount,
      currency,
      kind,
      status: TransferStatus::Pending,
      receipt_id: None,
      error: None,
      created_at: now,
      updated_at: now,
    }
  }
}

/// Per-wallet result of one race, produced by the settlement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResult {
  pub wallet: Wallet,
  pub race_id: RaceId,
  /// Amount staked, per currency.
  pub staked: Vec<CurrencyAmount>,
  /// Amount paid out, per currency.
  pub paid_out: Vec<CurrencyAmount>,
  /// Whether the wallet backed the winning runner.
  pub won: bool,
  /// Performance points earned in this race.
  pub score: f64,
  pub recorded_at: DateTime<Utc>,
}

/// Running per-wallet aggregate, folded at every settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletStats {
  pub wallet: Wallet,
  pub races_played: u64,
  pub wins: u64,
  pub total_staked: Vec<CurrencyAmount>,
  pub total_won: Vec<CurrencyAmount>,
  pub cumulative_score: f64,
  pub updated_at: DateTime<Utc>,
}

impl WalletStats {
  /// Fresh stats for a wallet's first race.
  pub fn new(wallet: impl Into<Wallet>) -> Self {
    Self {
      wallet: wallet.into(),
      races_played: 0,
      wins: 0,
      total_staked: Vec::new(),
      total_won: Vec::new(),
      cumulative_score: 0.0,
      updated_at: Utc::now(),
    }
  }
}

/// Process-wide treasury state: rolling jackpot balances and the
/// maintenance flag set by the external admin control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreasurySnapshot {
  /// Accumulated jackpot balance per currency.
  pub jackpot_balances: HashMap<Currency, Decimal>,
  /// While set, the scheduler stops locking new races; in-flight races
  /// still finish.
  pub maintenance: bool,
}

impl TreasurySnapshot {
  /// Current jackpot balance for a currency (zero if never accrued).
  pub fn jackpot_balance(&self, currency: Currency) -> Decimal {
    self
      .jackpot_balances
      .get(&currency)
      .copied()
      .unwrap_or(Decimal::ZERO)
  }
}

/// Trait for race state persistence providers.
///
/// Implementors typically layer a write-through in-memory cache over a
/// durable store; the core depends only on this trait and never on the
/// cache-vs-durable distinction.
#[async_trait]
pub trait RaceRepository: Send + Sync + 'static {
  /// Load a race by id.
  async fn get_race(&self, id: &str) -> anyhow::Result<Option<Race>>;

  /// Persist a race as a full overwrite (last-writer-wins).
  async fn put_race(&self, race: &Race) -> anyhow::Result<()>;

  /// All races not yet in a terminal state, for the scheduler and sweep.
  async fn list_non_terminal_races(&self) -> anyhow::Result<Vec<Race>>;

  /// Append a bet record. Only the external bet-acceptance collaborator
  /// writes bets; the core reads them during settlement.
  async fn append_bet(&self, bet: &Bet) -> anyhow::Result<()>;

  /// All bets for a race, in acceptance order.
  async fn list_bets(&self, race_id: &str) -> anyhow::Result<Vec<Bet>>;

  /// Append a new settlement transfer row.
  async fn append_settlement_transfer(
    &self,
    transfer: &SettlementTransfer,
  ) -> anyhow::Result<()>;

  /// Update an existing settlement transfer row (status/receipt/error).
  async fn update_settlement_transfer(
    &self,
    transfer: &SettlementTransfer,
  ) -> anyhow::Result<()>;

  /// Look up the transfer row for (race, recipient, kind, currency).
  async fn find_settlement_transfer(
    &self,
    race_id: &str,
    recipient: &str,
    kind: TransferKind,
    currency: Currency,
  ) -> anyhow::Result<Option<SettlementTransfer>>;

  /// Transfer rows for a race (report building, retry sweeps).
  async fn list_settlement_transfers(
    &self,
    race_id: &str,
  ) -> anyhow::Result<Vec<SettlementTransfer>>;

  /// Atomically claim the single live-race slot for `race_id`.
  ///
  /// Returns `None` on success. Returns `Some(holder)` when a different
  /// race holds the slot. Claiming a slot already held by `race_id`
  /// succeeds, so lock retries are safe.
  async fn try_acquire_live_slot(&self, race_id: &str) -> anyhow::Result<Option<RaceId>>;

  /// Release the live slot if `race_id` holds it. Releasing a slot held
  /// by another race is a no-op.
  async fn release_live_slot(&self, race_id: &str) -> anyhow::Result<()>;

  /// Load the treasury snapshot (jackpots + maintenance flag).
  async fn load_treasury(&self) -> anyhow::Result<TreasurySnapshot>;

  /// Persist the treasury snapshot.
  async fn save_treasury(&self, treasury: &TreasurySnapshot) -> anyhow::Result<()>;

  /// Atomically persist a race together with the treasury snapshot.
  ///
  /// Backs the settlement plan commit: the race's status, winner, and
  /// jackpot contribution must land in the same write as the jackpot
  /// balance change, or a crash between the two could pay the jackpot
  /// twice.
  async fn commit_race_and_treasury(
    &self,
    race: &Race,
    treasury: &TreasurySnapshot,
  ) -> anyhow::Result<()>;

  /// Write a per-race user result (idempotent per wallet+race).
  async fn upsert_user_result(&self, result: &UserResult) -> anyhow::Result<()>;

  /// Load a wallet's running aggregate stats.
  async fn get_wallet_stats(&self, wallet: &str) -> anyhow::Result<Option<WalletStats>>;

  /// Persist a wallet's running aggregate stats.
  async fn upsert_wallet_stats(&self, stats: &WalletStats) -> anyhow::Result<()>;

  /// Check if the repository is healthy (disk space, permissions).
  async fn is_healthy(&self) -> bool;
}
