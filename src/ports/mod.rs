//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the domain/usecases layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `PriceSource`: USD spot prices for tracked assets
//! - `RaceRepository`: race/bet/transfer/treasury persistence
//! - `TransferExecutor`: outbound value transfers via the ledger

pub mod price_source;
pub mod repository;
pub mod transfer;
