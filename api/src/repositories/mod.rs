pub mod holdings_repository;
pub mod market_asset_repository;

pub use holdings_repository::{
    HoldingsRepository, InMemoryHoldingsRepository, PostgresHoldingsRepository,
};
pub use market_asset_repository::{
    InMemoryMarketAssetRepository, MarketAssetRepository, PostgresMarketAssetRepository,
};
