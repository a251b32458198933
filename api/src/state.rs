use std::sync::Arc;

use valuation::PriceOracle;

use crate::{
    config::AppConfig,
    repositories::{HoldingsRepository, MarketAssetRepository},
    services::PortfolioSessions,
};

#[derive(Clone)]
pub struct AppState {
    pub holdings_repo: Arc<dyn HoldingsRepository>,
    pub market_assets: Arc<dyn MarketAssetRepository>,
    pub oracle: Arc<dyn PriceOracle>,
    pub sessions: Arc<PortfolioSessions>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        holdings_repo: Arc<dyn HoldingsRepository>,
        market_assets: Arc<dyn MarketAssetRepository>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        let sessions = Arc::new(PortfolioSessions::new(
            holdings_repo.clone(),
            oracle.clone(),
            config.price_refresh_interval,
            config.session_idle_ttl,
        ));
        Self {
            holdings_repo,
            market_assets,
            oracle,
            sessions,
        }
    }
}

// Axum state must be shareable across worker threads.
#[allow(dead_code)]
fn _assert_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
