//! Core racing domain types.
//!
//! Defines the business entities: races, runners, bets, and the transition
//! graph between race states. These types are the foundation of the
//! hexagonal architecture's inner ring — no I/O happens here.
//!
//! The transition graph is strictly forward-only, except that every
//! non-terminal state may move to `Cancelled`:
//!
//! ```text
//! Open -> Locked -> InProgress -> Settled
//! Open | Locked | InProgress -> Cancelled
//! ```

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────
// Type aliases consumed by ports and adapters
// ────────────────────────────────────────────

/// Lightweight race identifier used at the ports boundary.
pub type RaceId = String;

/// Wallet address of a staker or payout recipient.
pub type Wallet = String;

/// External asset identifier understood by the price source (e.g. "solana").
pub type AssetId = String;

// ────────────────────────────────────────────
// Enums shared across domain and ports
// ────────────────────────────────────────────

/// Currencies bets can be staked in. Each currency settles independently;
/// pots are never mixed across currencies. Ordered so per-currency maps
/// iterate deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Currency {
    /// Native SOL, minimum unit one lamport.
    SOL,
    /// USDC (SPL), minimum unit one micro-dollar.
    USDC,
}

impl Currency {
    /// Smallest representable unit of the currency. All payouts are
    /// floored to a multiple of this so the pool is never overdrawn.
    pub fn minimum_unit(&self) -> Decimal {
        match self {
            Self::SOL => dec!(0.000000001),
            Self::USDC => dec!(0.000001),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SOL => write!(f, "SOL"),
            Self::USDC => write!(f, "USDC"),
        }
    }
}

/// Lifecycle status of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaceStatus {
    /// Accepting bets; runners fixed, no prices captured yet.
    Open,
    /// Betting closed, baseline prices captured.
    Locked,
    /// The measured window is running.
    InProgress,
    /// Winner determined and distribution executed. Terminal.
    Settled,
    /// Aborted; all stakes refunded. Terminal.
    Cancelled,
}

impl RaceStatus {
    /// Whether the status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Cancelled)
    }
}

impl std::fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Locked => write!(f, "LOCKED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Settled => write!(f, "SETTLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Who requested a transition. Admin actors bypass timing checks
/// (a forced early settle) but never the graph or the live-race guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    /// Per-race timer task.
    Scheduler,
    /// Periodic reconciliation sweep.
    Sweep,
    /// Admin control plane (forced transition).
    Admin,
}

impl Actor {
    /// Whether this actor may drive a transition before its due time.
    pub fn may_force(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Returns true if `from -> to` is an edge of the transition graph.
///
/// Idempotent re-application (`from == to`) is handled by the state
/// machine, not here; this is the strict edge relation.
pub fn can_transition(from: RaceStatus, to: RaceStatus) -> bool {
    use RaceStatus::*;
    matches!(
        (from, to),
        (Open, Locked)
            | (Locked, InProgress)
            | (InProgress, Settled)
            | (Open, Cancelled)
            | (Locked, Cancelled)
            | (InProgress, Cancelled)
    )
}

// ────────────────────────────────────────────
// Entities
// ────────────────────────────────────────────

/// One competing tracked asset within a race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    /// Asset identifier understood by the price source.
    pub asset_id: AssetId,
    /// Display name shown by the out-of-scope UI layer.
    pub display_name: String,
    /// USD price captured when the race locked. `None` means the fetch
    /// failed after bounded retries; the runner is excluded from winner
    /// eligibility but the race proceeds.
    pub baseline_price: Option<Decimal>,
    /// When the baseline was captured.
    pub baseline_captured_at: Option<DateTime<Utc>>,
    /// USD price captured at settlement.
    pub final_price: Option<Decimal>,
    /// Most recent polled price, display only. Never used for scoring.
    pub last_price: Option<Decimal>,
}

impl Runner {
    /// Create a runner with no captured prices.
    pub fn new(asset_id: impl Into<AssetId>, display_name: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            display_name: display_name.into(),
            baseline_price: None,
            baseline_captured_at: None,
            final_price: None,
            last_price: None,
        }
    }

    /// Percentage change over the race window, if both prices are present
    /// and the baseline is non-zero.
    pub fn price_change(&self) -> Option<Decimal> {
        match (self.baseline_price, self.final_price) {
            (Some(baseline), Some(fin)) if !baseline.is_zero() => {
                Some((fin - baseline) / baseline)
            }
            _ => None,
        }
    }
}

/// One instance of the timed contest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    /// Unique race identifier, assigned by the external race creator.
    pub id: RaceId,
    /// When the race is scheduled to lock and begin measuring.
    pub scheduled_start: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: RaceStatus,
    /// Competing assets, fixed at creation. Bets reference runners by index.
    pub runners: Vec<Runner>,
    /// Operator rake in basis points of the pot.
    pub rake_bps: u32,
    /// Whether the rolling jackpot pays into this race's prize pool.
    pub jackpot_eligible: bool,
    /// Jackpot amounts paid into the prize pool at settlement, per
    /// currency (audit field, set by the settlement engine).
    pub jackpot_contribution: Vec<CurrencyAmount>,
    /// Winning runner index, set at settlement. `None` for races settled
    /// via the refund path or not yet settled.
    pub winner_index: Option<usize>,
    /// Transition timestamps, each set exactly once when taken.
    pub locked_at: Option<DateTime<Utc>>,
    pub in_progress_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// An amount in a specific currency. Used wherever per-currency totals
/// must serialize cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAmount {
    pub currency: Currency,
    pub amount: Decimal,
}

impl Race {
    /// Whether the race has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the race currently occupies the single live slot.
    pub fn is_live(&self) -> bool {
        matches!(self.status, RaceStatus::Locked | RaceStatus::InProgress)
    }

    /// The wall-clock instant at which the next forward transition is due,
    /// or `None` for terminal races.
    ///
    /// Open races are due to lock at `scheduled_start`; both later windows
    /// are anchored on `locked_at` so a late lock does not stretch the race.
    pub fn next_due(&self, windows: &RaceWindows) -> Option<DateTime<Utc>> {
        match self.status {
            RaceStatus::Open => Some(self.scheduled_start),
            RaceStatus::Locked => self.locked_at.map(|t| t + windows.grace),
            RaceStatus::InProgress => self.locked_at.map(|t| t + windows.progress),
            RaceStatus::Settled | RaceStatus::Cancelled => None,
        }
    }

    /// The next forward state this race would move to, or `None` if terminal.
    pub fn next_forward_state(&self) -> Option<RaceStatus> {
        match self.status {
            RaceStatus::Open => Some(RaceStatus::Locked),
            RaceStatus::Locked => Some(RaceStatus::InProgress),
            RaceStatus::InProgress => Some(RaceStatus::Settled),
            RaceStatus::Settled | RaceStatus::Cancelled => None,
        }
    }

    /// Determine the winner from captured prices.
    ///
    /// The winner is the runner with the strictly highest percentage
    /// change among runners with both a baseline and a final price. Ties
    /// resolve to the lowest runner index (iteration replaces the best
    /// only on a strictly greater change). Returns `None` when no runner
    /// has valid price data — the race then settles via the refund path.
    pub fn compute_winner(&self) -> Option<usize> {
        let mut best: Option<(usize, Decimal)> = None;
        for (idx, runner) in self.runners.iter().enumerate() {
            if let Some(change) = runner.price_change() {
                match best {
                    Some((_, best_change)) if change <= best_change => {}
                    _ => best = Some((idx, change)),
                }
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Configured durations for the race lifecycle windows.
#[derive(Debug, Clone, Copy)]
pub struct RaceWindows {
    /// Pause between lock and measurement start, letting baseline capture
    /// settle.
    pub grace: Duration,
    /// Full measured window, anchored at `locked_at`.
    pub progress: Duration,
}

/// A stake on one runner, created by the external bet-acceptance
/// collaborator while the race is open. The core only reads bets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    /// Race this bet belongs to.
    pub race_id: RaceId,
    /// Index into `Race::runners`.
    pub runner_index: usize,
    /// Staker wallet address; also the refund/payout recipient.
    pub wallet: Wallet,
    /// Staked amount.
    pub amount: Decimal,
    /// Stake currency.
    pub currency: Currency,
    /// Receipt of the inbound transfer that funded the stake.
    pub funding_receipt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with(baseline: Option<Decimal>, fin: Option<Decimal>) -> Runner {
        Runner {
            asset_id: "test".to_string(),
            display_name: "Test".to_string(),
            baseline_price: baseline,
            baseline_captured_at: baseline.map(|_| Utc::now()),
            final_price: fin,
            last_price: None,
        }
    }

    fn race_with_runners(runners: Vec<Runner>) -> Race {
        Race {
            id: "race_1".to_string(),
            scheduled_start: Utc::now(),
            status: RaceStatus::InProgress,
            runners,
            rake_bps: 500,
            jackpot_eligible: false,
            jackpot_contribution: Vec::new(),
            winner_index: None,
            locked_at: Some(Utc::now()),
            in_progress_at: Some(Utc::now()),
            settled_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_transition_graph_allowed_edges() {
        use RaceStatus::*;
        assert!(can_transition(Open, Locked));
        assert!(can_transition(Locked, InProgress));
        assert!(can_transition(InProgress, Settled));
        assert!(can_transition(Open, Cancelled));
        assert!(can_transition(Locked, Cancelled));
        assert!(can_transition(InProgress, Cancelled));
    }

    #[test]
    fn test_transition_graph_closure() {
        use RaceStatus::*;
        let all = [Open, Locked, InProgress, Settled, Cancelled];
        let allowed = [
            (Open, Locked),
            (Locked, InProgress),
            (InProgress, Settled),
            (Open, Cancelled),
            (Locked, Cancelled),
            (InProgress, Cancelled),
        ];
        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    can_transition(from, to),
                    expected,
                    "edge {from} -> {to} mismatch"
                );
            }
        }
    }

    #[test]
    fn test_no_back_edges_from_terminal() {
        use RaceStatus::*;
        for to in [Open, Locked, InProgress, Settled, Cancelled] {
            assert!(!can_transition(Settled, to));
            assert!(!can_transition(Cancelled, to));
        }
    }

    #[test]
    fn test_winner_highest_change() {
        let race = race_with_runners(vec![
            runner_with(Some(dec!(100)), Some(dec!(105))), // +5%
            runner_with(Some(dec!(200)), Some(dec!(206))), // +3%
            runner_with(Some(dec!(50)), Some(dec!(48))),   // -4%
        ]);
        assert_eq!(race.compute_winner(), Some(0));
    }

    #[test]
    fn test_winner_tie_breaks_to_lowest_index() {
        let race = race_with_runners(vec![
            runner_with(Some(dec!(100)), Some(dec!(102))), // +2%
            runner_with(Some(dec!(50)), Some(dec!(51))),   // +2%
        ]);
        assert_eq!(race.compute_winner(), Some(0));
    }

    #[test]
    fn test_winner_skips_runners_without_baseline() {
        let race = race_with_runners(vec![
            runner_with(None, Some(dec!(999))),
            runner_with(Some(dec!(100)), Some(dec!(101))),
        ]);
        assert_eq!(race.compute_winner(), Some(1));
    }

    #[test]
    fn test_winner_none_when_no_valid_prices() {
        let race = race_with_runners(vec![
            runner_with(None, None),
            runner_with(Some(dec!(100)), None),
        ]);
        assert_eq!(race.compute_winner(), None);
    }

    #[test]
    fn test_winner_negative_changes_still_produce_winner() {
        // Everyone lost value: the least-bad runner wins.
        let race = race_with_runners(vec![
            runner_with(Some(dec!(100)), Some(dec!(90))), // -10%
            runner_with(Some(dec!(100)), Some(dec!(95))), // -5%
        ]);
        assert_eq!(race.compute_winner(), Some(1));
    }

    #[test]
    fn test_zero_baseline_is_ineligible() {
        let race = race_with_runners(vec![runner_with(Some(dec!(0)), Some(dec!(1)))]);
        assert_eq!(race.compute_winner(), None);
    }

    #[test]
    fn test_next_due_anchored_on_locked_at() {
        let windows = RaceWindows {
            grace: Duration::seconds(15),
            progress: Duration::seconds(300),
        };
        let mut race = race_with_runners(vec![]);
        let locked = race.locked_at.unwrap();

        race.status = RaceStatus::Locked;
        assert_eq!(race.next_due(&windows), Some(locked + Duration::seconds(15)));

        race.status = RaceStatus::InProgress;
        assert_eq!(race.next_due(&windows), Some(locked + Duration::seconds(300)));

        race.status = RaceStatus::Settled;
        assert_eq!(race.next_due(&windows), None);
    }

    #[test]
    fn test_currency_minimum_unit() {
        assert_eq!(Currency::SOL.minimum_unit(), dec!(0.000000001));
        assert_eq!(Currency::USDC.minimum_unit(), dec!(0.000001));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", RaceStatus::InProgress), "IN_PROGRESS");
        assert_eq!(format!("{}", RaceStatus::Open), "OPEN");
    }
}
