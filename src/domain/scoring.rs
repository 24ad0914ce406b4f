//! Performance scoring.
//!
//! Converts each staker's race outcome into performance points that feed
//! the per-wallet running aggregates. Stake and payout contributions use
//! square-root scaling so a whale staking 100x does not earn 100x the
//! points, and the efficiency term is capped for the same reason.
//!
//! All constants are policy parameters supplied through configuration;
//! tests assert shape (monotonicity, caps, floors), not exact values.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::Deserialize;

/// Scoring formula constants, loaded from the `[scoring]` config section.
/// Missing fields fall back to the documented defaults.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    /// Flat points for showing up.
    pub participation_base: f64,
    /// Flat bonus for backing the winning runner.
    pub win_bonus: f64,
    /// Multiplier on sqrt(stake).
    pub stake_weight: f64,
    /// Multiplier on sqrt(payout).
    pub payout_weight: f64,
    /// Multiplier on the payout/stake efficiency ratio.
    pub efficiency_weight: f64,
    /// Efficiency ratio is clamped to this before weighting.
    pub efficiency_cap: f64,
    /// Multiplier on ln(1 + pot).
    pub pot_weight: f64,
    /// Losers keep this fraction of their computed score.
    pub loser_fraction: f64,
    /// Minimum score a loser can receive.
    pub loser_floor: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            participation_base: 10.0,
            win_bonus: 100.0,
            stake_weight: 2.0,
            payout_weight: 1.0,
            efficiency_weight: 5.0,
            efficiency_cap: 10.0,
            pot_weight: 1.5,
            loser_fraction: 0.25,
            loser_floor: 5.0,
        }
    }
}

/// One staker's monetary outcome for a single race and currency.
#[derive(Debug, Clone, Copy)]
pub struct StakeOutcome {
    /// Total amount the wallet staked.
    pub staked: Decimal,
    /// Total amount paid out to the wallet (zero for losers).
    pub paid_out: Decimal,
    /// Total pot of the currency the wallet staked in.
    pub pot: Decimal,
    /// Whether the wallet backed the winning runner.
    pub won: bool,
}

/// Compute the performance score for one staker's outcome.
pub fn performance_score(outcome: &StakeOutcome, params: &ScoringParams) -> f64 {
    let stake = outcome.staked.to_f64().unwrap_or(0.0).max(0.0);
    let payout = outcome.paid_out.to_f64().unwrap_or(0.0).max(0.0);
    let pot = outcome.pot.to_f64().unwrap_or(0.0).max(0.0);

    let mut score = params.participation_base;

    if outcome.won {
        score += params.win_bonus;
    }

    score += params.stake_weight * stake.sqrt();
    score += params.payout_weight * payout.sqrt();

    if stake > 0.0 {
        let efficiency = (payout / stake).min(params.efficiency_cap);
        score += params.efficiency_weight * efficiency;
    }

    score += params.pot_weight * (1.0 + pot).ln();

    if outcome.won {
        score
    } else {
        (score * params.loser_fraction).max(params.loser_floor)
    }
}
