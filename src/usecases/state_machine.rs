//! Race State Machine - Lifecycle Transition Authority
//!
//! The single entry point for every race state change. The scheduler,
//! the reconciliation sweep, and the admin control plane all drive the
//! same `transition` call, so the transition graph, timing windows, and
//! the single-live-race invariant are enforced in exactly one place.
//!
//! Transition side effects:
//! - `Open -> Locked`: claim the live slot, capture baseline prices
//! - `Locked -> InProgress`: timestamp only
//! - `InProgress -> Settled`: capture final prices, determine the
//!   winner, run settlement synchronously
//! - `* -> Cancelled`: refund all stakes, release the live slot
//!
//! Transitions are idempotent: re-applying the current status is a
//! no-op success, and for terminal targets it re-runs the (itself
//! idempotent) settlement pass so an interrupted distribution can be
//! completed by simply re-applying the transition.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::domain::error::EngineError;
use crate::domain::race::{can_transition, Actor, Race, RaceStatus, RaceWindows};
use crate::ports::price_source::PriceSource;
use crate::ports::repository::RaceRepository;
use crate::ports::transfer::TransferExecutor;
use crate::usecases::settlement::SettlementEngine;

/// Validates and applies race state transitions.
pub struct RaceStateMachine<R, P, T>
where
  R: RaceRepository,
  P: PriceSource,
  T: TransferExecutor,
{
  repo: Arc<R>,
  prices: Arc<P>,
  engine: Arc<SettlementEngine<R, T>>,
  windows: RaceWindows,
}

impl<R, P, T> RaceStateMachine<R, P, T>
where
  R: RaceRepository,
  P: PriceSource,
  T: TransferExecutor,
{
  /// Create a new state machine.
  pub fn new(
    repo: Arc<R>,
    prices: Arc<P>,
    engine: Arc<SettlementEngine<R, T>>,
    windows: RaceWindows,
  ) -> Self {
    Self {
      repo,
      prices,
      engine,
      windows,
    }
  }

  /// The configured lifecycle windows.
  pub fn windows(&self) -> &RaceWindows {
    &self.windows
  }

  /// Apply `target` to the race, enforcing the transition graph, the
  /// timing windows (admins may force past those), and the
  /// single-live-race invariant.
  ///
  /// # Errors
  /// - `InvalidTransition` for edges outside the graph
  /// - `TransitionNotDue` when the window has not elapsed (non-admin)
  /// - `ConcurrentLiveRace` when another race holds the live slot
  /// - `Repository` when persistence fails; the transition is then not
  ///   applied and the caller retries
  #[instrument(skip(self))]
  pub async fn transition(
    &self,
    race_id: &str,
    target: RaceStatus,
    actor: Actor,
  ) -> Result<Race, EngineError> {
    let mut race = self
      .repo
      .get_race(race_id)
      .await?
      .ok_or_else(|| EngineError::RaceNotFound(race_id.to_string()))?;

    if race.status == target {
      // Idempotent re-application. For terminal targets, re-run the
      // settlement pass so an interrupted distribution completes; the
      // transfer-row guards make this free when nothing is left to do.
      // The slot release repeats too, in case the first attempt died
      // between settling and releasing.
      match target {
        RaceStatus::Settled => {
          self.engine.settle(&mut race).await?;
          self.repo.release_live_slot(&race.id).await?;
        }
        RaceStatus::Cancelled => {
          self.engine.refund(&race).await?;
          self.repo.release_live_slot(&race.id).await?;
        }
        _ => {}
      }
      return Ok(race);
    }

    if !can_transition(race.status, target) {
      return Err(EngineError::InvalidTransition {
        from: race.status,
        to: target,
      });
    }

    match target {
      RaceStatus::Locked => self.lock(&mut race, actor).await?,
      RaceStatus::InProgress => self.start_progress(&mut race, actor).await?,
      RaceStatus::Settled => self.settle(&mut race, actor).await?,
      RaceStatus::Cancelled => self.cancel(&mut race).await?,
      RaceStatus::Open => {
        // No edge leads back to Open; the graph check above already
        // rejected this.
        unreachable!("graph check rejects transitions to Open");
      }
    }

    Ok(race)
  }

  // -- Open -> Locked ---------------------------------------------------

  async fn lock(&self, race: &mut Race, actor: Actor) -> Result<(), EngineError> {
    let now = Utc::now();
    if now < race.scheduled_start && !actor.may_force() {
      return Err(EngineError::TransitionNotDue {
        due_at: race.scheduled_start,
      });
    }

    // Single-live-race invariant: one atomic conditional claim against
    // the repository. Re-claiming our own slot succeeds, so a retry
    // after a failed persist is safe.
    if let Some(holder) = self.repo.try_acquire_live_slot(&race.id).await? {
      return Err(EngineError::ConcurrentLiveRace { holder });
    }

    self.capture_baselines(race).await;

    race.status = RaceStatus::Locked;
    race.locked_at = Some(now);
    self.repo.put_race(race).await?;

    info!(
      race_id = %race.id,
      runners = race.runners.len(),
      missing_baselines = race
        .runners
        .iter()
        .filter(|r| r.baseline_price.is_none())
        .count(),
      "Race locked"
    );
    Ok(())
  }

  /// Fetch a baseline price for every runner. A fetch failure flags the
  /// runner as having no baseline (excluded from winner eligibility)
  /// and never aborts the lock.
  async fn capture_baselines(&self, race: &mut Race) {
    for runner in &mut race.runners {
      // Baselines are immutable once captured (retried lock attempts
      // must not move the reference point).
      if runner.baseline_price.is_some() {
        continue;
      }
      match self.prices.get_price(&runner.asset_id).await {
        Ok(quote) => {
          runner.baseline_price = Some(quote.usd_price);
          runner.baseline_captured_at = Some(quote.as_of);
          runner.last_price = Some(quote.usd_price);
        }
        Err(e) => {
          warn!(
            race_id = %race.id,
            asset = %runner.asset_id,
            error = %e,
            "Baseline price unavailable, runner excluded from eligibility"
          );
        }
      }
    }
  }

  // -- Locked -> InProgress ---------------------------------------------

  async fn start_progress(&self, race: &mut Race, actor: Actor) -> Result<(), EngineError> {
    let now = Utc::now();
    if let Some(locked_at) = race.locked_at {
      let due_at = locked_at + self.windows.grace;
      if now < due_at && !actor.may_force() {
        return Err(EngineError::TransitionNotDue { due_at });
      }
    }

    race.status = RaceStatus::InProgress;
    race.in_progress_at = Some(now);
    self.repo.put_race(race).await?;

    info!(race_id = %race.id, "Race in progress");
    Ok(())
  }

  // -- InProgress -> Settled --------------------------------------------

  async fn settle(&self, race: &mut Race, actor: Actor) -> Result<(), EngineError> {
    let now = Utc::now();
    if let Some(locked_at) = race.locked_at {
      let due_at = locked_at + self.windows.progress;
      if now < due_at && !actor.may_force() {
        return Err(EngineError::TransitionNotDue { due_at });
      }
    }

    self.capture_finals(race).await;

    race.winner_index = race.compute_winner();
    race.status = RaceStatus::Settled;
    race.settled_at = Some(now);

    // The settlement engine persists the race itself so status, winner,
    // and jackpot contribution land in one write, then distributes the
    // pot (or refunds everyone when no runner had valid prices).
    let report = self.engine.settle(race).await?;

    self.repo.release_live_slot(&race.id).await?;

    info!(
      race_id = %race.id,
      winner = ?race.winner_index,
      transfers_ok = report.succeeded,
      transfers_failed = report.failed,
      "Race settled"
    );
    Ok(())
  }

  /// Fetch final prices for every runner that has a baseline. A fetch
  /// failure leaves the runner without a final price (ineligible).
  async fn capture_finals(&self, race: &mut Race) {
    for runner in &mut race.runners {
      if runner.baseline_price.is_none() {
        continue;
      }
      match self.prices.get_price(&runner.asset_id).await {
        Ok(quote) => {
          runner.final_price = Some(quote.usd_price);
          runner.last_price = Some(quote.usd_price);
        }
        Err(e) => {
          warn!(
            race_id = %race.id,
            asset = %runner.asset_id,
            error = %e,
            "Final price unavailable, runner excluded from winner selection"
          );
        }
      }
    }
  }

  // -- * -> Cancelled ---------------------------------------------------

  async fn cancel(&self, race: &mut Race) -> Result<(), EngineError> {
    race.status = RaceStatus::Cancelled;
    race.cancelled_at = Some(Utc::now());
    self.repo.put_race(race).await?;

    // A race cancelled from Open never held the slot; release is a
    // no-op in that case.
    self.repo.release_live_slot(&race.id).await?;

    let report = self.engine.refund(race).await?;

    info!(
      race_id = %race.id,
      refunds_ok = report.succeeded,
      refunds_failed = report.failed,
      "Race cancelled and refunded"
    );
    Ok(())
  }

  // -- Display price polling --------------------------------------------

  /// Refresh `last_price` on every runner of a live race. Display-only;
  /// scoring always uses the captured baseline/final prices.
  pub async fn refresh_display_prices(&self, race_id: &str) -> Result<(), EngineError> {
    let Some(mut race) = self.repo.get_race(race_id).await? else {
      return Ok(());
    };
    if !race.is_live() {
      return Ok(());
    }

    let mut changed = false;
    for runner in &mut race.runners {
      if let Ok(quote) = self.prices.get_price(&runner.asset_id).await {
        runner.last_price = Some(quote.usd_price);
        changed = true;
      }
    }
    if changed {
      self.repo.put_race(&race).await?;
    }
    Ok(())
  }
}
