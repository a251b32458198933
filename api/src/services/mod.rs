pub mod price_oracle;
pub mod refresh;
pub mod sessions;

pub use price_oracle::{
    CachedPriceOracle, FallbackPriceOracle, StaticPriceOracle, TwelveDataPriceOracle,
};
pub use refresh::{
    PortfolioController, RefreshError, RefreshHandle, RefreshOutcome, RefreshScheduler,
    RefreshTrigger,
};
pub use sessions::PortfolioSessions;
