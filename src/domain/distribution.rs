//! Parimutuel distribution engine.
//!
//! Pure pot arithmetic: rake, treasury/jackpot split, proportional winner
//! payouts, and refunds. All amounts are `rust_decimal::Decimal`; every
//! division that could leave a remainder rounds DOWN to the currency's
//! minimum unit so the pool can never be overdrawn. Residual dust stays
//! with the treasury side of the ledger.
//!
//! Currencies settle independently — a race with SOL and USDC bets
//! produces one `CurrencyDistribution` per currency, never a mixed pot.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::race::{Bet, Currency, Wallet};

/// How the rake splits between the operator treasury and the rolling
/// jackpot. The treasury takes `treasury_bps` of the rake; the jackpot
/// accrues the remainder exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RakeSplit {
    /// Treasury share of the rake, in basis points (6000 = 60%).
    pub treasury_bps: u32,
}

impl Default for RakeSplit {
    fn default() -> Self {
        Self { treasury_bps: 6000 }
    }
}

/// A single recipient's share of the prize pool (or refund).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub wallet: Wallet,
    pub amount: Decimal,
}

/// The complete monetary outcome for one currency of one race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyDistribution {
    pub currency: Currency,
    /// Total staked in this currency.
    pub pot: Decimal,
    /// Rake taken off the pot (treasury share + jackpot accrual).
    pub rake: Decimal,
    /// Rake share owed to the treasury recipient as an outbound transfer.
    pub treasury_share: Decimal,
    /// Rake share accrued to the jackpot balance (internal, no transfer).
    pub jackpot_accrual: Decimal,
    /// Jackpot balance folded into the prize pool (jackpot-eligible races).
    pub jackpot_paid_in: Decimal,
    /// Pot minus rake plus any jackpot paid in.
    pub prize_pool: Decimal,
    /// Per-wallet winner payouts, aggregated across a wallet's bets.
    pub payouts: Vec<Payout>,
    /// Prize pool rolled into the jackpot when the winning runner had no
    /// backers.
    pub rolled_to_jackpot: Decimal,
    /// Rounding residue left after flooring payouts to the minimum unit.
    pub dust: Decimal,
}

impl CurrencyDistribution {
    /// Net change to the jackpot balance for this currency.
    pub fn jackpot_delta(&self) -> Decimal {
        self.jackpot_accrual + self.rolled_to_jackpot - self.jackpot_paid_in
    }

    /// Sum of all winner payouts.
    pub fn paid_total(&self) -> Decimal {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

/// Round an amount DOWN to a multiple of the currency's minimum unit.
pub fn floor_to_unit(amount: Decimal, currency: Currency) -> Decimal {
    let unit = currency.minimum_unit();
    (amount / unit).floor() * unit
}

/// Compute the winner-case distribution for every currency present in
/// `bets`.
///
/// `jackpot_balance` resolves the currency's current jackpot balance;
/// it is consulted only when `jackpot_eligible` is set. The caller (the
/// settlement engine) owns actually moving the balances.
pub fn compute_distribution(
    bets: &[Bet],
    winner_index: usize,
    rake_bps: u32,
    jackpot_eligible: bool,
    jackpot_balance: impl Fn(Currency) -> Decimal,
    split: RakeSplit,
) -> Vec<CurrencyDistribution> {
    let bps = Decimal::from(10_000u32);

    per_currency(bets)
        .into_iter()
        .map(|(currency, currency_bets)| {
            let pot: Decimal = currency_bets.iter().map(|b| b.amount).sum();

            let rake = floor_to_unit(pot * Decimal::from(rake_bps) / bps, currency);
            let treasury_share =
                floor_to_unit(rake * Decimal::from(split.treasury_bps) / bps, currency);
            let jackpot_accrual = rake - treasury_share;

            let jackpot_paid_in = if jackpot_eligible {
                jackpot_balance(currency)
            } else {
                Decimal::ZERO
            };
            let prize_pool = pot - rake + jackpot_paid_in;

            // Aggregate winning stakes per wallet so each recipient gets
            // exactly one payout transfer.
            let mut winning_stakes: BTreeMap<Wallet, Decimal> = BTreeMap::new();
            for bet in &currency_bets {
                if bet.runner_index == winner_index {
                    *winning_stakes.entry(bet.wallet.clone()).or_default() += bet.amount;
                }
            }
            let total_winning_stake: Decimal = winning_stakes.values().copied().sum();

            let (payouts, rolled_to_jackpot, dust) = if total_winning_stake.is_zero() {
                // Winner had no backers: the whole prize pool rolls into
                // the jackpot for a future race.
                (Vec::new(), prize_pool, Decimal::ZERO)
            } else {
                let payouts: Vec<Payout> = winning_stakes
                    .into_iter()
                    .map(|(wallet, stake)| Payout {
                        wallet,
                        amount: floor_to_unit(
                            prize_pool * stake / total_winning_stake,
                            currency,
                        ),
                    })
                    .collect();
                let paid: Decimal = payouts.iter().map(|p| p.amount).sum();
                (payouts, Decimal::ZERO, prize_pool - paid)
            };

            CurrencyDistribution {
                currency,
                pot,
                rake,
                treasury_share,
                jackpot_accrual,
                jackpot_paid_in,
                prize_pool,
                payouts,
                rolled_to_jackpot,
                dust,
            }
        })
        .collect()
}

/// Compute full refunds for every bet, aggregated per wallet per currency.
/// No rake, no jackpot movement.
pub fn compute_refunds(bets: &[Bet]) -> Vec<(Currency, Vec<Payout>)> {
    per_currency(bets)
        .into_iter()
        .map(|(currency, currency_bets)| {
            let mut refunds: BTreeMap<Wallet, Decimal> = BTreeMap::new();
            for bet in &currency_bets {
                *refunds.entry(bet.wallet.clone()).or_default() += bet.amount;
            }
            let payouts = refunds
                .into_iter()
                .map(|(wallet, amount)| Payout { wallet, amount })
                .collect();
            (currency, payouts)
        })
        .collect()
}

/// Group bets by currency, preserving deterministic currency ordering.
fn per_currency(bets: &[Bet]) -> BTreeMap<Currency, Vec<Bet>> {
    let mut grouped: BTreeMap<Currency, Vec<Bet>> = BTreeMap::new();
    for bet in bets {
        grouped.entry(bet.currency).or_default().push(bet.clone());
    }
    grouped
}
