//! Reconciliation Sweep - Crash-Safe Transition Catch-Up
//!
//! Runs on a short fixed interval over all non-terminal races and
//! computes, from stored timestamps alone, what state each race should
//! be in right now. Races lagging their expected state (missed timer,
//! process restart, late-firing timer) are driven forward one step at a
//! time through the same `transition` entry point as everything else —
//! never skipping a state.
//!
//! On boot the sweep alone is sufficient to catch every race back up;
//! no per-race timer state needs to survive a restart.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::EngineError;
use crate::domain::race::{Actor, Race, RaceStatus};
use crate::ports::price_source::PriceSource;
use crate::ports::repository::RaceRepository;
use crate::ports::transfer::TransferExecutor;
use crate::usecases::state_machine::RaceStateMachine;

/// Periodic sweep that self-heals missed transitions.
pub struct ReconciliationSweep<R, P, T>
where
  R: RaceRepository,
  P: PriceSource,
  T: TransferExecutor,
{
  state_machine: Arc<RaceStateMachine<R, P, T>>,
  repo: Arc<R>,
  interval: std::time::Duration,
}

impl<R, P, T> ReconciliationSweep<R, P, T>
where
  R: RaceRepository,
  P: PriceSource,
  T: TransferExecutor,
{
  /// Create a new sweep.
  pub fn new(
    state_machine: Arc<RaceStateMachine<R, P, T>>,
    repo: Arc<R>,
    interval: std::time::Duration,
  ) -> Self {
    Self {
      state_machine,
      repo,
      interval,
    }
  }

  /// Run the sweep loop until shutdown.
  #[instrument(skip(self, shutdown_rx), name = "reconciliation_loop")]
  pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut tick = tokio::time::interval(self.interval);

    info!(interval_secs = self.interval.as_secs(), "Reconciliation sweep started");

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Reconciliation sweep received shutdown signal");
          break;
        }
        _ = tick.tick() => {
          self.sweep().await;
        }
      }
    }

    info!("Reconciliation sweep stopped");
  }

  /// One full pass over all non-terminal races.
  pub async fn sweep(&self) {
    let races = match self.repo.list_non_terminal_races().await {
      Ok(races) => races,
      Err(e) => {
        warn!(error = %e, "Sweep could not list races");
        return;
      }
    };

    let maintenance = match self.repo.load_treasury().await {
      Ok(treasury) => treasury.maintenance,
      Err(_) => false,
    };

    for race in races {
      self.catch_up(race, maintenance).await;
    }
  }

  /// Drive one race forward until it matches its expected state,
  /// one transition per step. A conflict or error stops this race's
  /// catch-up until the next cycle.
  async fn catch_up(&self, mut race: Race, maintenance: bool) {
    loop {
      if maintenance && race.status == RaceStatus::Open {
        return;
      }
      let Some(due_at) = race.next_due(self.state_machine.windows()) else {
        return;
      };
      if Utc::now() < due_at {
        return;
      }
      let Some(target) = race.next_forward_state() else {
        return;
      };

      match self
        .state_machine
        .transition(&race.id, target, Actor::Sweep)
        .await
      {
        Ok(updated) => {
          if updated.status == race.status {
            return;
          }
          info!(
            race_id = %race.id,
            from = %race.status,
            to = %updated.status,
            "Sweep advanced lagging race"
          );
          race = updated;
        }
        Err(EngineError::ConcurrentLiveRace { holder }) => {
          debug!(race_id = %race.id, holder = %holder, "Sweep deferred: live slot busy");
          return;
        }
        Err(e) => {
          warn!(race_id = %race.id, target = %target, error = %e, "Sweep transition failed");
          return;
        }
      }
    }
  }
}
