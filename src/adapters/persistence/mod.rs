//! Persistence Adapters - JSONL-based File Storage
//!
//! Implements the RaceRepository port using append-only JSONL journals
//! for bets/transfers/results and atomic JSON snapshots for mutable
//! engine state. No database dependency — lightweight and
//! crash-recoverable.

pub mod journal;
pub mod repository_impl;
pub mod store;

pub use journal::RaceJournal;
pub use repository_impl::RaceRepositoryImpl;
pub use store::{EngineSnapshot, SnapshotStore};
