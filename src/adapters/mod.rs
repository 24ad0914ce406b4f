//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, file I/O). Each sub-module
//! groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `prices`: CoinGecko USD spot prices with caching and retries
//! - `ledger`: HMAC-authenticated transfer execution client
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: JSONL journals and atomic state snapshots

pub mod ledger;
pub mod metrics;
pub mod persistence;
pub mod prices;
