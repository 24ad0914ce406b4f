//! Price adapters - PriceSource port implementations.

pub mod coingecko;

pub use coingecko::CoinGeckoPriceSource;
