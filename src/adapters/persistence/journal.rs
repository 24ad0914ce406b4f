//! Race Journals - Append-only JSONL Records
//!
//! Persists bets, settlement transfers, and user results to per-race
//! JSONL files. Each line is a self-contained JSON record for easy
//! parsing, streaming, and crash recovery.
//!
//! Settlement transfers are an event log: a status change appends a new
//! version of the row, and readers take the latest version per
//! (recipient, kind, currency). The full history stays on disk as the
//! audit trail.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};

use crate::domain::race::Bet;
use crate::ports::repository::{SettlementTransfer, UserResult};

/// Append-only JSONL journals, one file per race per record type.
pub struct RaceJournal {
    /// Directory for bet files (`bets/<race_id>.jsonl`).
    bets_dir: PathBuf,
    /// Directory for transfer event logs (`transfers/<race_id>.jsonl`).
    transfers_dir: PathBuf,
    /// Directory for user results (`results/<race_id>.jsonl`).
    results_dir: PathBuf,
}

impl RaceJournal {
    /// Create a new journal in the given data directory.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let bets_dir = Path::new(data_dir).join("bets");
        let transfers_dir = Path::new(data_dir).join("transfers");
        let results_dir = Path::new(data_dir).join("results");

        for dir in [&bets_dir, &transfers_dir, &results_dir] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create journal dir {}", dir.display()))?;
        }

        Ok(Self {
            bets_dir,
            transfers_dir,
            results_dir,
        })
    }

    // -- Bets -------------------------------------------------------------

    /// Append a bet to its race's journal.
    #[instrument(skip(self, bet), fields(race_id = %bet.race_id))]
    pub async fn append_bet(&self, bet: &Bet) -> Result<()> {
        let path = self.bets_dir.join(format!("{}.jsonl", bet.race_id));
        append_line(&path, bet).await
    }

    /// Load all bets for a race, in acceptance order.
    pub async fn load_bets(&self, race_id: &str) -> Result<Vec<Bet>> {
        let path = self.bets_dir.join(format!("{race_id}.jsonl"));
        read_lines(&path).await
    }

    // -- Settlement transfers ---------------------------------------------

    /// Append a transfer row version to its race's event log.
    #[instrument(skip(self, transfer), fields(race_id = %transfer.race_id))]
    pub async fn append_transfer(&self, transfer: &SettlementTransfer) -> Result<()> {
        let path = self
            .transfers_dir
            .join(format!("{}.jsonl", transfer.race_id));
        append_line(&path, transfer).await
    }

    /// Load all transfer row versions for a race, oldest first.
    pub async fn load_transfer_events(&self, race_id: &str) -> Result<Vec<SettlementTransfer>> {
        let path = self.transfers_dir.join(format!("{race_id}.jsonl"));
        read_lines(&path).await
    }

    /// Race ids that have a transfer journal on disk.
    pub async fn race_ids_with_transfers(&self) -> Result<Vec<String>> {
        list_race_ids(&self.transfers_dir).await
    }

    /// Race ids that have a bet journal on disk.
    pub async fn race_ids_with_bets(&self) -> Result<Vec<String>> {
        list_race_ids(&self.bets_dir).await
    }

    // -- User results -----------------------------------------------------

    /// Upsert a wallet's result line in the race's results file.
    ///
    /// Results files are small (one line per wallet) so the
    /// replace-or-append rewrite stays cheap; the rewrite is atomic via
    /// tmp + rename like the snapshot store.
    #[instrument(skip(self, result), fields(race_id = %result.race_id, wallet = %result.wallet))]
    pub async fn upsert_result(&self, result: &UserResult) -> Result<()> {
        let path = self.results_dir.join(format!("{}.jsonl", result.race_id));
        let mut results: Vec<UserResult> = read_lines(&path).await?;

        match results.iter_mut().find(|r| r.wallet == result.wallet) {
            Some(existing) => *existing = result.clone(),
            None => results.push(result.clone()),
        }

        let mut content = String::new();
        for r in &results {
            content.push_str(&serde_json::to_string(r)?);
            content.push('\n');
        }

        let tmp = path.with_extension("jsonl.tmp");
        fs::write(&tmp, &content)
            .await
            .context("Failed to write tmp results file")?;
        fs::rename(&tmp, &path)
            .await
            .context("Failed to rename results file")?;

        Ok(())
    }

    /// Check if the journal directories are writable.
    pub async fn is_healthy(&self) -> bool {
        let test_path = self.bets_dir.join(".health_check");
        let result = fs::write(&test_path, b"ok").await;
        let _ = fs::remove_file(&test_path).await;
        result.is_ok()
    }
}

/// Append one serialized record plus newline, creating the file if
/// needed, and flush before returning.
async fn append_line<T: serde::Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut json = serde_json::to_string(record).context("Failed to serialize record")?;
    json.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open journal file {}", path.display()))?;

    file.write_all(json.as_bytes())
        .await
        .context("Failed to write journal record")?;
    file.flush().await.context("Failed to flush journal")?;

    Ok(())
}

/// Read every well-formed record from a JSONL file. A missing file is
/// an empty journal; malformed lines are skipped with a warning.
async fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read journal file {}", path.display()))?;

    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    file = %path.display(),
                    error = %e,
                    "Skipping malformed journal record"
                );
            }
        }
    }

    Ok(records)
}

/// Race ids derived from `<race_id>.jsonl` filenames in a directory.
async fn list_race_ids(dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "jsonl") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
    }

    Ok(ids)
}
