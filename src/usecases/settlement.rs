//! Settlement Use Case - Prize Pool Distribution and Refunds
//!
//! Executes the monetary outcome of a race: rake split, jackpot
//! accounting, proportional winner payouts, refunds on cancellation,
//! and the per-wallet scoring side effect.
//!
//! Both `settle` and `refund` are idempotent with respect to
//! `SettlementTransfer` records: every logical transfer is guarded by a
//! (race, recipient, kind, currency) row written `Pending` before the
//! executor call and marked `Success`/`Failed` after it. Re-invocation
//! skips rows already marked `Success` and retries the rest, so a
//! partially failed settlement can always be completed without risk of
//! double payment.
//!
//! Settlement flow (winner case):
//! 1. Load bets and compute the per-currency distribution
//! 2. First pass only: commit the race record and treasury deltas
//! 3. Drive the transfer executor per recipient, row-guarded
//! 4. First pass only: record user results and fold wallet stats

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::distribution::{
  compute_distribution, compute_refunds, CurrencyDistribution, RakeSplit,
};
use crate::domain::error::EngineError;
use crate::domain::race::{Bet, Currency, CurrencyAmount, Race, RaceStatus, Wallet};
use crate::domain::scoring::{performance_score, ScoringParams, StakeOutcome};
use crate::ports::repository::{
  RaceRepository, SettlementTransfer, TransferKind, TransferStatus, UserResult,
  WalletStats,
};
use crate::ports::transfer::TransferExecutor;

/// Policy parameters for the settlement engine.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
  /// Treasury/jackpot split of the rake.
  pub rake_split: RakeSplit,
  /// Recipient address for the treasury share of the rake.
  pub treasury_recipient: Wallet,
  /// Performance scoring constants.
  pub scoring: ScoringParams,
}

/// How a race's pot was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
  /// Rake taken, winners paid proportionally.
  Distribution,
  /// Every stake returned in full (cancellation or no valid prices).
  Refund,
}

/// One attempted (or skipped) outbound transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
  pub recipient: Wallet,
  pub kind: TransferKind,
  pub currency: Currency,
  pub amount: Decimal,
  pub status: TransferStatus,
  /// Row was already `Success` from a previous pass; nothing was sent.
  pub skipped: bool,
  pub error: Option<String>,
}

/// Aggregated report from one settlement or refund pass.
#[derive(Debug, Clone)]
pub struct SettlementReport {
  pub race_id: String,
  pub mode: SettlementMode,
  /// Per-currency pot arithmetic (empty for refunds).
  pub distributions: Vec<CurrencyDistribution>,
  /// Individual transfer outcomes, in execution order.
  pub transfers: Vec<TransferOutcome>,
  /// Transfers confirmed by the ledger in this pass.
  pub succeeded: usize,
  /// Transfers recorded as failed in this pass (retried later).
  pub failed: usize,
  /// Rows already `Success` from earlier passes.
  pub skipped: usize,
  /// User results written in this pass.
  pub results_recorded: usize,
  pub timestamp: DateTime<Utc>,
}

impl SettlementReport {
  fn new(race_id: &str, mode: SettlementMode) -> Self {
    Self {
      race_id: race_id.to_string(),
      mode,
      distributions: Vec::new(),
      transfers: Vec::new(),
      succeeded: 0,
      failed: 0,
      skipped: 0,
      results_recorded: 0,
      timestamp: Utc::now(),
    }
  }

  fn push(&mut self, outcome: TransferOutcome) {
    if outcome.skipped {
      self.skipped += 1;
    } else if outcome.status == TransferStatus::Success {
      self.succeeded += 1;
    } else {
      self.failed += 1;
    }
    self.transfers.push(outcome);
  }
}

/// Settlement engine driving distribution, refunds, and scoring.
///
/// The treasury lock serializes every jackpot read-modify-write so
/// accrual and payout can never interleave across races.
pub struct SettlementEngine<R: RaceRepository, T: TransferExecutor> {
  repo: Arc<R>,
  executor: Arc<T>,
  config: SettlementConfig,
  treasury_lock: Mutex<()>,
}

impl<R: RaceRepository, T: TransferExecutor> SettlementEngine<R, T> {
  /// Create a new settlement engine.
  pub fn new(repo: Arc<R>, executor: Arc<T>, config: SettlementConfig) -> Self {
    Self {
      repo,
      executor,
      config,
      treasury_lock: Mutex::new(()),
    }
  }

  /// Settle a race that has reached `Settled`.
  ///
  /// The caller passes the race with final prices, winner, and
  /// timestamps already set in memory; this method owns persisting it,
  /// so the status, winner, and jackpot contribution commit in a single
  /// write. A race with no winner (no runner had valid prices) settles
  /// through the refund path: stakes returned, no rake, no scoring.
  #[instrument(skip(self, race), fields(race_id = %race.id))]
  pub async fn settle(&self, race: &mut Race) -> Result<SettlementReport, EngineError> {
    let bets = self.repo.list_bets(&race.id).await?;

    let persisted = self
      .repo
      .get_race(&race.id)
      .await?
      .ok_or_else(|| EngineError::RaceNotFound(race.id.clone()))?;
    let first_pass = persisted.status != RaceStatus::Settled;

    match race.winner_index {
      Some(winner) => {
        self
          .settle_with_winner(race, &bets, winner, first_pass)
          .await
      }
      None => {
        info!(
          race_id = %race.id,
          bets = bets.len(),
          "No eligible runners, settling via refund path"
        );
        if first_pass {
          self.repo.put_race(race).await?;
        }
        let mut report = SettlementReport::new(&race.id, SettlementMode::Refund);
        self.execute_refunds(&race.id, &bets, &mut report).await;
        self.log_report(&report);
        Ok(report)
      }
    }
  }

  /// Refund every stake of a cancelled race in full.
  ///
  /// No rake, no jackpot movement, no scoring. The caller persists the
  /// `Cancelled` status before invoking.
  #[instrument(skip(self, race), fields(race_id = %race.id))]
  pub async fn refund(&self, race: &Race) -> Result<SettlementReport, EngineError> {
    let bets = self.repo.list_bets(&race.id).await?;
    let mut report = SettlementReport::new(&race.id, SettlementMode::Refund);
    self.execute_refunds(&race.id, &bets, &mut report).await;
    self.log_report(&report);
    Ok(report)
  }

  // -- Winner-case settlement -------------------------------------------

  async fn settle_with_winner(
    &self,
    race: &mut Race,
    bets: &[Bet],
    winner: usize,
    first_pass: bool,
  ) -> Result<SettlementReport, EngineError> {
    let mut report = SettlementReport::new(&race.id, SettlementMode::Distribution);

    // Jackpot payout and accrual must never interleave across races.
    let distributions = {
      let _guard = self.treasury_lock.lock().await;

      if first_pass && race.jackpot_eligible && race.jackpot_contribution.is_empty() {
        let treasury = self.repo.load_treasury().await?;
        race.jackpot_contribution = treasury
          .jackpot_balances
          .iter()
          .filter(|(_, amount)| !amount.is_zero())
          .map(|(currency, amount)| CurrencyAmount {
            currency: *currency,
            amount: *amount,
          })
          .collect();
      }

      // The recorded contribution is authoritative from here on, so a
      // completion pass after a crash computes the identical plan even
      // though the live balance was already zeroed.
      let paid_in: BTreeMap<Currency, Decimal> = race
        .jackpot_contribution
        .iter()
        .map(|c| (c.currency, c.amount))
        .collect();

      let distributions = compute_distribution(
        bets,
        winner,
        race.rake_bps,
        race.jackpot_eligible,
        |currency| paid_in.get(&currency).copied().unwrap_or(Decimal::ZERO),
        self.config.rake_split,
      );

      if first_pass {
        // One atomic commit: Settled status + winner + recorded
        // contribution + the jackpot balance change. Splitting these
        // into two writes would open a double-payment window.
        let mut treasury = self.repo.load_treasury().await?;
        for dist in &distributions {
          let balance = treasury.jackpot_balance(dist.currency) + dist.jackpot_delta();
          treasury.jackpot_balances.insert(dist.currency, balance);
        }
        self.repo.commit_race_and_treasury(race, &treasury).await?;
      }

      distributions
    };

    // Transfers run outside the treasury lock: each is independently
    // guarded by its SettlementTransfer row.
    let treasury_recipient = self.config.treasury_recipient.clone();
    for dist in &distributions {
      if !dist.treasury_share.is_zero() {
        let outcome = self
          .execute_transfer(
            &race.id,
            &treasury_recipient,
            dist.treasury_share,
            dist.currency,
            TransferKind::Rake,
          )
          .await;
        report.push(outcome);
      }

      for payout in &dist.payouts {
        if payout.amount.is_zero() {
          continue;
        }
        let outcome = self
          .execute_transfer(
            &race.id,
            &payout.wallet,
            payout.amount,
            dist.currency,
            TransferKind::Payout,
          )
          .await;
        report.push(outcome);
      }
    }

    if first_pass {
      report.results_recorded = self
        .record_results(race, bets, winner, &distributions)
        .await?;
    }

    report.distributions = distributions;
    self.log_report(&report);
    Ok(report)
  }

  // -- Refund execution -------------------------------------------------

  async fn execute_refunds(
    &self,
    race_id: &str,
    bets: &[Bet],
    report: &mut SettlementReport,
  ) {
    for (currency, refunds) in compute_refunds(bets) {
      for payout in refunds {
        if payout.amount.is_zero() {
          continue;
        }
        let outcome = self
          .execute_transfer(
            race_id,
            &payout.wallet,
            payout.amount,
            currency,
            TransferKind::Refund,
          )
          .await;
        report.push(outcome);
      }
    }
  }

  // -- Row-guarded transfer execution -----------------------------------

  /// Execute one logical transfer behind its idempotency row.
  ///
  /// A row already marked `Success` short-circuits without touching the
  /// ledger. Failures are recorded on the row and returned in the
  /// outcome; they never propagate, so one bad recipient cannot block
  /// the rest of the settlement.
  async fn execute_transfer(
    &self,
    race_id: &str,
    recipient: &str,
    amount: Decimal,
    currency: Currency,
    kind: TransferKind,
  ) -> TransferOutcome {
    let existing = match self
      .repo
      .find_settlement_transfer(race_id, recipient, kind, currency)
      .await
    {
      Ok(row) => row,
      Err(e) => {
        warn!(
          race_id,
          recipient,
          kind = %kind,
          error = %e,
          "Transfer row lookup failed, skipping recipient this pass"
        );
        return TransferOutcome {
          recipient: recipient.to_string(),
          kind,
          currency,
          amount,
          status: TransferStatus::Failed,
          skipped: false,
          error: Some(format!("row lookup failed: {e}")),
        };
      }
    };

    if let Some(row) = &existing {
      if row.status == TransferStatus::Success {
        return TransferOutcome {
          recipient: recipient.to_string(),
          kind,
          currency,
          amount: row.amount,
          status: TransferStatus::Success,
          skipped: true,
          error: None,
        };
      }
    }

    // Write (or reset) the Pending row BEFORE calling the ledger — the
    // row is the idempotency key, so it must exist first.
    let mut row = match existing {
      Some(mut row) => {
        row.status = TransferStatus::Pending;
        row.error = None;
        row.updated_at = Utc::now();
        if let Err(e) = self.repo.update_settlement_transfer(&row).await {
          return self.row_write_failure(recipient, kind, currency, amount, e);
        }
        row
      }
      None => {
        let row = SettlementTransfer::pending(race_id, recipient, amount, currency, kind);
        if let Err(e) = self.repo.append_settlement_transfer(&row).await {
          return self.row_write_failure(recipient, kind, currency, amount, e);
        }
        row
      }
    };

    match self.executor.send(recipient, row.amount, currency).await {
      Ok(receipt) => {
        row.status = TransferStatus::Success;
        row.receipt_id = Some(receipt.receipt_id);
        row.updated_at = Utc::now();
        if let Err(e) = self.repo.update_settlement_transfer(&row).await {
          // The ledger confirmed but the row update failed: keep the
          // receipt in the log so the record can be repaired.
          warn!(
            race_id,
            recipient,
            receipt = ?row.receipt_id,
            error = %e,
            "Transfer confirmed but row update failed"
          );
        }
        TransferOutcome {
          recipient: recipient.to_string(),
          kind,
          currency,
          amount: row.amount,
          status: TransferStatus::Success,
          skipped: false,
          error: None,
        }
      }
      Err(e) => {
        warn!(
          race_id,
          recipient,
          kind = %kind,
          amount = %row.amount,
          error = %e,
          "Transfer failed, recorded for retry"
        );
        row.status = TransferStatus::Failed;
        row.error = Some(e.to_string());
        row.updated_at = Utc::now();
        if let Err(update_err) = self.repo.update_settlement_transfer(&row).await {
          warn!(race_id, recipient, error = %update_err, "Failed-row update also failed");
        }
        TransferOutcome {
          recipient: recipient.to_string(),
          kind,
          currency,
          amount: row.amount,
          status: TransferStatus::Failed,
          skipped: false,
          error: Some(e.to_string()),
        }
      }
    }
  }

  fn row_write_failure(
    &self,
    recipient: &str,
    kind: TransferKind,
    currency: Currency,
    amount: Decimal,
    e: anyhow::Error,
  ) -> TransferOutcome {
    warn!(recipient, kind = %kind, error = %e, "Could not write transfer row, not sending");
    TransferOutcome {
      recipient: recipient.to_string(),
      kind,
      currency,
      amount,
      status: TransferStatus::Failed,
      skipped: false,
      error: Some(format!("row write failed: {e}")),
    }
  }

  // -- Scoring ----------------------------------------------------------

  /// Compute performance scores, write user results, and fold wallet
  /// aggregates. Runs only on the first settlement pass.
  async fn record_results(
    &self,
    race: &Race,
    bets: &[Bet],
    winner: usize,
    distributions: &[CurrencyDistribution],
  ) -> Result<usize, EngineError> {
    // Per-wallet staked amounts per currency, and the winner flag.
    let mut staked: BTreeMap<Wallet, BTreeMap<Currency, Decimal>> = BTreeMap::new();
    let mut won: BTreeMap<Wallet, bool> = BTreeMap::new();
    for bet in bets {
      *staked
        .entry(bet.wallet.clone())
        .or_default()
        .entry(bet.currency)
        .or_default() += bet.amount;
      let entry = won.entry(bet.wallet.clone()).or_insert(false);
      *entry |= bet.runner_index == winner;
    }

    // Per-wallet payouts per currency, straight from the distribution.
    let mut paid: BTreeMap<Wallet, BTreeMap<Currency, Decimal>> = BTreeMap::new();
    let mut pots: BTreeMap<Currency, Decimal> = BTreeMap::new();
    for dist in distributions {
      pots.insert(dist.currency, dist.pot);
      for payout in &dist.payouts {
        *paid
          .entry(payout.wallet.clone())
          .or_default()
          .entry(dist.currency)
          .or_default() += payout.amount;
      }
    }

    let now = Utc::now();
    let mut recorded = 0usize;

    for (wallet, stakes) in &staked {
      let wallet_won = won.get(wallet).copied().unwrap_or(false);
      let wallet_paid = paid.get(wallet).cloned().unwrap_or_default();

      // A wallet active in several currencies earns an independent
      // score contribution per currency.
      let mut score = 0.0;
      for (currency, stake) in stakes {
        let outcome = StakeOutcome {
          staked: *stake,
          paid_out: wallet_paid.get(currency).copied().unwrap_or(Decimal::ZERO),
          pot: pots.get(currency).copied().unwrap_or(Decimal::ZERO),
          won: wallet_won,
        };
        score += performance_score(&outcome, &self.config.scoring);
      }

      let result = UserResult {
        wallet: wallet.clone(),
        race_id: race.id.clone(),
        staked: to_amounts(stakes),
        paid_out: to_amounts(&wallet_paid),
        won: wallet_won,
        score,
        recorded_at: now,
      };
      self.repo.upsert_user_result(&result).await?;

      let mut stats = self
        .repo
        .get_wallet_stats(wallet)
        .await?
        .unwrap_or_else(|| WalletStats::new(wallet.clone()));
      stats.races_played += 1;
      if wallet_won {
        stats.wins += 1;
      }
      for amount in &result.staked {
        accumulate(&mut stats.total_staked, amount.currency, amount.amount);
      }
      for amount in &result.paid_out {
        accumulate(&mut stats.total_won, amount.currency, amount.amount);
      }
      stats.cumulative_score += score;
      stats.updated_at = now;
      self.repo.upsert_wallet_stats(&stats).await?;

      recorded += 1;
    }

    Ok(recorded)
  }

  fn log_report(&self, report: &SettlementReport) {
    info!(
      race_id = %report.race_id,
      mode = ?report.mode,
      succeeded = report.succeeded,
      failed = report.failed,
      skipped = report.skipped,
      results = report.results_recorded,
      "Settlement pass complete"
    );
  }
}

/// Convert a per-currency map into the serializable amount list.
fn to_amounts(map: &BTreeMap<Currency, Decimal>) -> Vec<CurrencyAmount> {
  map
    .iter()
    .map(|(currency, amount)| CurrencyAmount {
      currency: *currency,
      amount: *amount,
    })
    .collect()
}

/// Add an amount into a per-currency total list.
fn accumulate(totals: &mut Vec<CurrencyAmount>, currency: Currency, amount: Decimal) {
  match totals.iter_mut().find(|t| t.currency == currency) {
    Some(total) => total.amount += amount,
    None => totals.push(CurrencyAmount { currency, amount }),
  }
}
