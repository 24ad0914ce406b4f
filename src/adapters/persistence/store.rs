//! Snapshot Store - Atomic JSON Engine State Persistence
//!
//! Saves the mutable engine state (races, treasury, live-race slot,
//! wallet aggregates) to `state.json` using atomic writes (write to tmp
//! file, then rename). This guarantees crash safety and prevents
//! partial writes from corrupting state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, instrument};

use crate::domain::race::{Race, RaceId, Wallet};
use crate::ports::repository::{TreasurySnapshot, WalletStats};

/// Full mutable engine state, serialized as one document.
///
/// Bets, settlement transfers, and user results live in append-only
/// journals instead — they grow without bound and never need the
/// read-modify-write cycle this snapshot exists for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// All known races by id.
    pub races: HashMap<RaceId, Race>,
    /// Jackpot balances and the maintenance flag.
    pub treasury: TreasurySnapshot,
    /// Race currently holding the single live slot, if any.
    pub live_race: Option<RaceId>,
    /// Running per-wallet aggregates.
    pub wallet_stats: HashMap<Wallet, WalletStats>,
}

/// Atomic JSON snapshot store for crash recovery.
///
/// State is written to a temporary file first, then atomically renamed
/// to `state.json`. The file is always either the old or the new
/// version, never a partial write.
pub struct SnapshotStore {
    /// Path to state.json.
    state_path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
}

impl SnapshotStore {
    /// Create a new snapshot store in the given data directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir);
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            state_path: dir.join("state.json"),
            tmp_path: dir.join("state.json.tmp"),
        })
    }

    /// Save a snapshot atomically (tmp → rename).
    #[instrument(skip(self, snapshot))]
    pub async fn save(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .context("Failed to serialize engine snapshot")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp state file")?;

        fs::rename(&self.tmp_path, &self.state_path)
            .await
            .context("Failed to rename state file")?;

        Ok(())
    }

    /// Load the most recent snapshot.
    ///
    /// Returns `None` if no state file exists (first startup).
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<EngineSnapshot>> {
        if !self.state_path.exists() {
            info!("No state file found, starting fresh");
            return Ok(None);
        }

        let json = fs::read_to_string(&self.state_path)
            .await
            .context("Failed to read state file")?;

        let snapshot: EngineSnapshot =
            serde_json::from_str(&json).context("Failed to parse state JSON")?;

        info!(
            races = snapshot.races.len(),
            live_race = ?snapshot.live_race,
            "Engine snapshot loaded"
        );

        Ok(Some(snapshot))
    }

    /// Check if the state file exists and is readable.
    pub async fn is_healthy(&self) -> bool {
        if !self.state_path.exists() {
            return true; // First run is OK
        }
        fs::metadata(&self.state_path).await.is_ok()
    }
}
