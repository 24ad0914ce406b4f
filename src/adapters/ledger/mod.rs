//! Ledger adapters - outbound transfer execution.
//!
//! HMAC-authenticated HTTP client for the external ledger service plus
//! the `TransferExecutor` port implementation built on top of it.

pub mod auth;
pub mod client;
pub mod executor;

pub use auth::LedgerAuth;
pub use client::{LedgerClient, LedgerClientConfig};
pub use executor::LedgerTransferExecutor;
