//! Distribution Benchmarks — Settlement Hot-Path Validation
//!
//! Benchmarks the pot arithmetic that runs on every settlement. The
//! decimal math must stay cheap even for races with thousands of bets,
//! since settlement runs synchronously inside the transition.
//!
//! Run with: cargo bench --bench distribution_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

use crypto_derby::domain::distribution::{compute_distribution, compute_refunds, RakeSplit};
use crypto_derby::domain::race::{Bet, Currency};
use crypto_derby::domain::scoring::{performance_score, ScoringParams, StakeOutcome};

/// Build a synthetic race with `n` bets from `n / 4` wallets.
fn synthetic_bets(n: usize) -> Vec<Bet> {
    (0..n)
        .map(|i| Bet {
            race_id: "bench_race".to_string(),
            runner_index: i % 5,
            wallet: format!("wallet_{}", i % (n / 4).max(1)),
            amount: Decimal::new(1_000_000 + (i as i64 * 37_213) % 50_000_000, 6),
            currency: Currency::USDC,
            funding_receipt: String::new(),
        })
        .collect()
}

fn no_jackpot(_c: Currency) -> Decimal {
    Decimal::ZERO
}

/// Benchmark the winner-case distribution for a typical race.
fn bench_distribution_100_bets(c: &mut Criterion) {
    let bets = synthetic_bets(100);

    c.bench_function("distribution_100_bets", |b| {
        b.iter(|| {
            let _ = compute_distribution(
                black_box(&bets),
                black_box(0),
                black_box(500),
                false,
                no_jackpot,
                RakeSplit::default(),
            );
        });
    });
}

/// Benchmark a whale race: thousands of bets in one settlement pass.
fn bench_distribution_5000_bets(c: &mut Criterion) {
    let bets = synthetic_bets(5000);

    c.bench_function("distribution_5000_bets", |b| {
        b.iter(|| {
            let _ = compute_distribution(
                black_box(&bets),
                black_box(2),
                black_box(500),
                false,
                no_jackpot,
                RakeSplit::default(),
            );
        });
    });
}

/// Benchmark refund aggregation (cancellation path).
fn bench_refunds_1000_bets(c: &mut Criterion) {
    let bets = synthetic_bets(1000);

    c.bench_function("refunds_1000_bets", |b| {
        b.iter(|| {
            let _ = compute_refunds(black_box(&bets));
        });
    });
}

/// Benchmark one performance score evaluation.
fn bench_performance_score(c: &mut Criterion) {
    let params = ScoringParams::default();
    let outcome = StakeOutcome {
        staked: Decimal::new(25_000_000, 6),
        paid_out: Decimal::new(60_000_000, 6),
        pot: Decimal::new(900_000_000, 6),
        won: true,
    };

    c.bench_function("performance_score", |b| {
        b.iter(|| {
            let _ = performance_score(black_box(&outcome), black_box(&params));
        });
    });
}

criterion_group!(
    benches,
    bench_distribution_100_bets,
    bench_distribution_5000_bets,
    bench_refunds_1000_bets,
    bench_performance_score,
);
criterion_main!(benches);
