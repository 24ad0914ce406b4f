//! Repository Implementation — Concrete Adapter for the Repository Port
//!
//! Combines the atomic snapshot store (races, treasury, live slot,
//! wallet aggregates) and the JSONL journals (bets, transfers, results)
//! behind a write-through in-memory cache, hydrated once at boot.
//!
//! This is the hexagonal architecture glue: the usecases layer only
//! knows about the `RaceRepository` trait, never about files, JSON, or
//! the cache-vs-durable split.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::journal::RaceJournal;
use super::store::{EngineSnapshot, SnapshotStore};
use crate::domain::race::{Bet, Currency, Race, RaceId};
use crate::ports::repository::{
    RaceRepository, SettlementTransfer, TransferKind, TreasurySnapshot, UserResult,
    WalletStats,
};

/// Cached mutable state guarded by one lock.
///
/// A single lock keeps the live-slot claim a true compare-and-swap:
/// check and set happen with no other writer in between.
#[derive(Default)]
struct Inner {
    snapshot: EngineSnapshot,
    bets: HashMap<RaceId, Vec<Bet>>,
    /// Latest transfer row per (recipient, kind, currency), per race.
    transfers: HashMap<RaceId, Vec<SettlementTransfer>>,
}

/// Concrete repository adapter over snapshot store + journals.
pub struct RaceRepositoryImpl {
    store: SnapshotStore,
    journal: RaceJournal,
    inner: RwLock<Inner>,
}

impl RaceRepositoryImpl {
    /// Open (or initialize) a repository in the given data directory,
    /// hydrating the cache from disk.
    pub async fn from_data_dir(data_dir: &str) -> Result<Self> {
        let store = SnapshotStore::new(data_dir).await?;
        let journal = RaceJournal::new(data_dir).await?;

        let snapshot = store.load().await?.unwrap_or_default();

        let mut bets = HashMap::new();
        for race_id in journal.race_ids_with_bets().await? {
            let race_bets = journal.load_bets(&race_id).await?;
            bets.insert(race_id, race_bets);
        }

        let mut transfers = HashMap::new();
        for race_id in journal.race_ids_with_transfers().await? {
            let events = journal.load_transfer_events(&race_id).await?;
            transfers.insert(race_id, fold_latest(events));
        }

        info!(
            races = snapshot.races.len(),
            races_with_bets = bets.len(),
            "Repository hydrated from disk"
        );

        Ok(Self {
            store,
            journal,
            inner: RwLock::new(Inner {
                snapshot,
                bets,
                transfers,
            }),
        })
    }

    /// Persist the current snapshot. Callers hold the write lock, so
    /// snapshot writes are serialized.
    async fn persist(&self, inner: &Inner) -> Result<()> {
        self.store.save(&inner.snapshot).await
    }
}

/// Reduce a transfer event log to the latest row version per
/// (recipient, kind, currency).
fn fold_latest(events: Vec<SettlementTransfer>) -> Vec<SettlementTransfer> {
    let mut latest: Vec<SettlementTransfer> = Vec::new();
    for event in events {
        match latest.iter_mut().find(|t| {
            t.recipient == event.recipient
                && t.kind == event.kind
                && t.currency == event.currency
        }) {
            Some(existing) => *existing = event,
            None => latest.push(event),
        }
    }
    latest
}

#[async_trait]
impl RaceRepository for RaceRepositoryImpl {
    async fn get_race(&self, id: &str) -> Result<Option<Race>> {
        let inner = self.inner.read().await;
        Ok(inner.snapshot.races.get(id).cloned())
    }

    async fn put_race(&self, race: &Race) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .snapshot
            .races
            .insert(race.id.clone(), race.clone());
        self.persist(&inner).await
    }

    async fn list_non_terminal_races(&self) -> Result<Vec<Race>> {
        let inner = self.inner.read().await;
        let mut races: Vec<Race> = inner
            .snapshot
            .races
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect();
        races.sort_by(|a, b| a.scheduled_start.cmp(&b.scheduled_start));
        Ok(races)
    }

    async fn append_bet(&self, bet: &Bet) -> Result<()> {
        self.journal.append_bet(bet).await?;
        let mut inner = self.inner.write().await;
        inner
            .bets
            .entry(bet.race_id.clone())
            .or_default()
            .push(bet.clone());
        Ok(())
    }

    async fn list_bets(&self, race_id: &str) -> Result<Vec<Bet>> {
        let inner = self.inner.read().await;
        Ok(inner.bets.get(race_id).cloned().unwrap_or_default())
    }

    async fn append_settlement_transfer(&self, transfer: &SettlementTransfer) -> Result<()> {
        self.journal.append_transfer(transfer).await?;
        let mut inner = self.inner.write().await;
        let rows = inner.transfers.entry(transfer.race_id.clone()).or_default();
        rows.push(transfer.clone());
        Ok(())
    }

    async fn update_settlement_transfer(&self, transfer: &SettlementTransfer) -> Result<()> {
        // Status changes append a new row version; the journal keeps
        // the full history as the audit trail.
        self.journal.append_transfer(transfer).await?;
        let mut inner = self.inner.write().await;
        let rows = inner.transfers.entry(transfer.race_id.clone()).or_default();
        match rows.iter_mut().find(|t| {
            t.recipient == transfer.recipient
                && t.kind == transfer.kind
                && t.currency == transfer.currency
        }) {
            Some(existing) => *existing = transfer.clone(),
            None => rows.push(transfer.clone()),
        }
        Ok(())
    }

    async fn find_settlement_transfer(
        &self,
        race_id: &str,
        recipient: &str,
        kind: TransferKind,
        currency: Currency,
    ) -> Result<Option<SettlementTransfer>> {
        let inner = self.inner.read().await;
        Ok(inner.transfers.get(race_id).and_then(|rows| {
            rows.iter()
                .find(|t| {
                    t.recipient == recipient && t.kind == kind && t.currency == currency
                })
                .cloned()
        }))
    }

    async fn list_settlement_transfers(&self, race_id: &str) -> Result<Vec<SettlementTransfer>> {
        let inner = self.inner.read().await;
        Ok(inner.transfers.get(race_id).cloned().unwrap_or_default())
    }

    async fn try_acquire_live_slot(&self, race_id: &str) -> Result<Option<RaceId>> {
        let mut inner = self.inner.write().await;
        match &inner.snapshot.live_race {
            Some(holder) if holder != race_id => Ok(Some(holder.clone())),
            Some(_) => Ok(None), // already ours, re-claim is a no-op
            None => {
                inner.snapshot.live_race = Some(race_id.to_string());
                self.persist(&inner).await?;
                Ok(None)
            }
        }
    }

    async fn release_live_slot(&self, race_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.snapshot.live_race.as_deref() == Some(race_id) {
            inner.snapshot.live_race = None;
            self.persist(&inner).await?;
        }
        Ok(())
    }

    async fn load_treasury(&self) -> Result<TreasurySnapshot> {
        let inner = self.inner.read().await;
        Ok(inner.snapshot.treasury.clone())
    }

    async fn save_treasury(&self, treasury: &TreasurySnapshot) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.snapshot.treasury = treasury.clone();
        self.persist(&inner).await
    }

    async fn commit_race_and_treasury(
        &self,
        race: &Race,
        treasury: &TreasurySnapshot,
    ) -> Result<()> {
        // Race and treasury live in the same snapshot document, so this
        // is genuinely one atomic write (tmp + rename).
        let mut inner = self.inner.write().await;
        inner
            .snapshot
            .races
            .insert(race.id.clone(), race.clone());
        inner.snapshot.treasury = treasury.clone();
        self.persist(&inner).await
    }

    async fn upsert_user_result(&self, result: &UserResult) -> Result<()> {
        self.journal.upsert_result(result).await
    }

    async fn get_wallet_stats(&self, wallet: &str) -> Result<Option<WalletStats>> {
        let inner = self.inner.read().await;
        Ok(inner.snapshot.wallet_stats.get(wallet).cloned())
    }

    async fn upsert_wallet_stats(&self, stats: &WalletStats) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .snapshot
            .wallet_stats
            .insert(stats.wallet.clone(), stats.clone());
        self.persist(&inner).await
    }

    async fn is_healthy(&self) -> bool {
        self.store.is_healthy().await && self.journal.is_healthy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::race::{RaceStatus, Runner};
    use crate::ports::repository::TransferStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn test_race(id: &str) -> Race {
        Race {
            id: id.to_string(),
            scheduled_start: Utc::now(),
            status: RaceStatus::Open,
            runners: vec![Runner::new("solana", "Solana")],
            rake_bps: 500,
            jackpot_eligible: false,
            jackpot_contribution: Vec::new(),
            winner_index: None,
            locked_at: None,
            in_progress_at: None,
            settled_at: None,
            cancelled_at: None,
        }
    }

    async fn repo_in_tempdir() -> (RaceRepositoryImpl, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("derby-repo-{}", uuid::Uuid::new_v4()));
        let repo = RaceRepositoryImpl::from_data_dir(dir.to_str().unwrap())
            .await
            .unwrap();
        (repo, dir)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (repo, dir) = repo_in_tempdir().await;
        let race = test_race("race_1");
        repo.put_race(&race).await.unwrap();

        let loaded = repo.get_race("race_1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "race_1");
        assert_eq!(loaded.status, RaceStatus::Open);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_live_slot_is_exclusive() {
        let (repo, dir) = repo_in_tempdir().await;

        assert!(repo.try_acquire_live_slot("race_1").await.unwrap().is_none());
        // Second race is refused while the first holds the slot.
        assert_eq!(
            repo.try_acquire_live_slot("race_2").await.unwrap(),
            Some("race_1".to_string())
        );
        // Re-claiming our own slot succeeds.
        assert!(repo.try_acquire_live_slot("race_1").await.unwrap().is_none());

        repo.release_live_slot("race_1").await.unwrap();
        assert!(repo.try_acquire_live_slot("race_2").await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_release_by_non_holder_is_noop() {
        let (repo, dir) = repo_in_tempdir().await;

        assert!(repo.try_acquire_live_slot("race_1").await.unwrap().is_none());
        repo.release_live_slot("race_2").await.unwrap();
        assert_eq!(
            repo.try_acquire_live_slot("race_3").await.unwrap(),
            Some("race_1".to_string())
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_transfer_update_keeps_latest_version() {
        let (repo, dir) = repo_in_tempdir().await;

        let mut row = SettlementTransfer::pending(
            "race_1",
            "alice",
            dec!(10),
            Currency::USDC,
            TransferKind::Payout,
        );
        repo.append_settlement_transfer(&row).await.unwrap();

        row.status = TransferStatus::Success;
        row.receipt_id = Some("rcpt_1".to_string());
        repo.update_settlement_transfer(&row).await.unwrap();

        let found = repo
            .find_settlement_transfer("race_1", "alice", TransferKind::Payout, Currency::USDC)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, TransferStatus::Success);
        assert_eq!(found.receipt_id.as_deref(), Some("rcpt_1"));

        // The audit journal keeps both versions.
        let events = repo.journal.load_transfer_events("race_1").await.unwrap();
        assert_eq!(events.len(), 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_hydration_restores_state() {
        let dir = std::env::temp_dir().join(format!("derby-repo-{}", uuid::Uuid::new_v4()));
        let path = dir.to_str().unwrap().to_string();

        {
            let repo = RaceRepositoryImpl::from_data_dir(&path).await.unwrap();
            let mut race = test_race("race_1");
            race.status = RaceStatus::Locked;
            repo.put_race(&race).await.unwrap();
            repo.try_acquire_live_slot("race_1").await.unwrap();

            let bet = Bet {
                race_id: "race_1".to_string(),
                runner_index: 0,
                wallet: "alice".to_string(),
                amount: dec!(5),
                currency: Currency::USDC,
                funding_receipt: "rcpt_in".to_string(),
            };
            repo.append_bet(&bet).await.unwrap();
        }

        // Fresh instance over the same directory sees everything.
        let repo = RaceRepositoryImpl::from_data_dir(&path).await.unwrap();
        let race = repo.get_race("race_1").await.unwrap().unwrap();
        assert_eq!(race.status, RaceStatus::Locked);
        assert_eq!(repo.list_bets("race_1").await.unwrap().len(), 1);
        assert_eq!(
            repo.try_acquire_live_slot("race_2").await.unwrap(),
            Some("race_1".to_string())
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
