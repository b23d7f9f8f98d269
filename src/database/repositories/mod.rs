/// Repository implementations for instruments and candles
///
/// - `MarketDataRepository` is the storage boundary used by the sync paths and the read API
/// - Writes only happen through `transaction`, which hands out a `MarketDataTx`
/// - `MarketDataRepositoryImpl` targets PostgreSQL, `InMemoryMarketDataRepository` keeps state in memory

pub mod in_memory;
pub mod market_data_repository;

pub use in_memory::InMemoryMarketDataRepository;
pub use market_data_repository::{
    MarketDataRepository, MarketDataRepositoryImpl, MarketDataTx, TxWork, UpsertCounts,
};
