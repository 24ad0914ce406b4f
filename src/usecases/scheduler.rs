//! Race Scheduler - Per-Race Transition Timers
//!
//! Maintains one lightweight tokio timer per active race that fires the
//! state machine's `transition` call at the intended time (lock at
//! `scheduled_start`, then grace and progress windows off `locked_at`).
//!
//! Timers are best-effort and live only in memory: a missed or lost
//! timer is always healed by the reconciliation sweep, which is the
//! source of truth for "should this race have moved on". Keeping the
//! two mechanisms independent is what makes the scheduler survive
//! process restarts without persisted timer state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::EngineError;
use crate::domain::race::{Actor, RaceId, RaceStatus};
use crate::ports::price_source::PriceSource;
use crate::ports::repository::RaceRepository;
use crate::ports::transfer::TransferExecutor;
use crate::usecases::state_machine::RaceStateMachine;

/// Scheduler timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
  /// How often to re-scan for races needing a timer.
  pub poll_interval: std::time::Duration,
  /// How often to refresh display prices on live races.
  pub price_poll_interval: std::time::Duration,
}

/// Arms and tracks per-race transition timers.
pub struct RaceScheduler<R, P, T>
where
  R: RaceRepository,
  P: PriceSource,
  T: TransferExecutor,
{
  state_machine: Arc<RaceStateMachine<R, P, T>>,
  repo: Arc<R>,
  config: SchedulerConfig,
  /// Active timer per race id. Entries are pruned once finished and
  /// re-armed on the next poll for the race's next state.
  timers: Mutex<HashMap<RaceId, JoinHandle<()>>>,
}

impl<R, P, T> RaceScheduler<R, P, T>
where
  R: RaceRepository,
  P: PriceSource,
  T: TransferExecutor,
{
  /// Create a new scheduler.
  pub fn new(
    state_machine: Arc<RaceStateMachine<R, P, T>>,
    repo: Arc<R>,
    config: SchedulerConfig,
  ) -> Self {
    Self {
      state_machine,
      repo,
      config,
      timers: Mutex::new(HashMap::new()),
    }
  }

  /// Run the scheduler loop until shutdown.
  #[instrument(skip(self, shutdown_rx), name = "scheduler_loop")]
  pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut poll = tokio::time::interval(self.config.poll_interval);
    let mut price_poll = tokio::time::interval(self.config.price_poll_interval);

    info!(
      poll_secs = self.config.poll_interval.as_secs(),
      "Scheduler started"
    );

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Scheduler received shutdown signal");
          break;
        }
        _ = poll.tick() => {
          self.arm_timers().await;
        }
        _ = price_poll.tick() => {
          self.refresh_live_prices().await;
        }
      }
    }

    // Cancel any timers still pending.
    let mut timers = self.timers.lock().await;
    for (_, handle) in timers.drain() {
      handle.abort();
    }
    info!("Scheduler stopped");
  }

  /// Scan non-terminal races and arm a timer for each race without one.
  async fn arm_timers(&self) {
    let races = match self.repo.list_non_terminal_races().await {
      Ok(races) => races,
      Err(e) => {
        warn!(error = %e, "Scheduler could not list races");
        return;
      }
    };

    let maintenance = match self.repo.load_treasury().await {
      Ok(treasury) => treasury.maintenance,
      Err(e) => {
        warn!(error = %e, "Scheduler could not read treasury, assuming no maintenance");
        false
      }
    };

    let mut timers = self.timers.lock().await;
    timers.retain(|_, handle| !handle.is_finished());

    for race in races {
      if timers.contains_key(&race.id) {
        continue;
      }
      // Maintenance mode: stop locking new races; in-flight races run
      // to completion.
      if maintenance && race.status == RaceStatus::Open {
        continue;
      }

      let Some(due_at) = race.next_due(self.state_machine.windows()) else {
        continue;
      };
      let Some(target) = race.next_forward_state() else {
        continue;
      };

      let state_machine = Arc::clone(&self.state_machine);
      let race_id = race.id.clone();
      let timer_id = race_id.clone();
      let handle = tokio::spawn(async move {
        let delay = (due_at - Utc::now())
          .to_std()
          .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(delay).await;
        Self::fire(&state_machine, &race_id, target).await;
      });
      timers.insert(timer_id, handle);

      debug!(race_id = %race.id, target = %target, due_at = %due_at, "Timer armed");
    }
  }

  /// Fire one transition. Conflicts and not-due races are left for the
  /// next poll or the sweep; they are expected under normal operation.
  async fn fire(
    state_machine: &RaceStateMachine<R, P, T>,
    race_id: &str,
    target: RaceStatus,
  ) {
    match state_machine
      .transition(race_id, target, Actor::Scheduler)
      .await
    {
      Ok(race) => {
        info!(race_id, status = %race.status, "Timer-driven transition applied");
      }
      Err(EngineError::ConcurrentLiveRace { holder }) => {
        debug!(race_id, holder = %holder, "Live slot busy, will retry");
      }
      Err(EngineError::TransitionNotDue { due_at }) => {
        debug!(race_id, due_at = %due_at, "Timer fired early, will re-arm");
      }
      Err(e) => {
        warn!(race_id, error = %e, "Timer-driven transition failed");
      }
    }
  }

  /// Update display prices on live races.
  async fn refresh_live_prices(&self) {
    let races = match self.repo.list_non_terminal_races().await {
      Ok(races) => races,
      Err(_) => return,
    };
    for race in races.iter().filter(|r| r.is_live()) {
      if let Err(e) = self.state_machine.refresh_display_prices(&race.id).await {
        debug!(race_id = %race.id, error = %e, "Display price refresh failed");
      }
    }
  }
}
