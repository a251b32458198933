use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use valuation::PriceOracle;

use crate::{
    config::AppConfig,
    repositories::{
        HoldingsRepository, InMemoryHoldingsRepository, InMemoryMarketAssetRepository,
        MarketAssetRepository, PostgresHoldingsRepository, PostgresMarketAssetRepository,
    },
    services::{CachedPriceOracle, FallbackPriceOracle, StaticPriceOracle, TwelveDataPriceOracle},
    state::AppState,
};

type Repositories = (Arc<dyn HoldingsRepository>, Arc<dyn MarketAssetRepository>);

pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let (holdings_repo, market_assets) = build_repositories(config).await?;
    let oracle = build_price_oracle(config)?;
    Ok(AppState::new(config, holdings_repo, market_assets, oracle))
}

async fn build_repositories(config: &AppConfig) -> Result<Repositories> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("connect to DATABASE_URL")?;
            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .context("run migrations")?;
            Ok((
                Arc::new(PostgresHoldingsRepository::new(pool.clone())),
                Arc::new(PostgresMarketAssetRepository::new(pool)),
            ))
        }
        None => {
            let repo = InMemoryHoldingsRepository::new();
            if let Some(user_id) = config.demo_user_id {
                repo.seed_demo(user_id).await;
                info!(%user_id, "seeded in-memory demo portfolio");
            }
            let catalog = InMemoryMarketAssetRepository::new();
            catalog.seed_demo().await;
            Ok((Arc::new(repo), Arc::new(catalog)))
        }
    }
}

/// Twelve Data, optionally backed by static `TOKEN_PRICES`, behind a TTL cache.
pub fn build_price_oracle(config: &AppConfig) -> Result<Arc<dyn PriceOracle>> {
    let live = Arc::new(TwelveDataPriceOracle::new(
        config.twelvedata_api_base.clone(),
        config.twelvedata_api_key.clone(),
        config.price_request_timeout,
    )?);
    if config.token_prices.is_empty() {
        return Ok(Arc::new(CachedPriceOracle::new(
            live,
            config.price_cache_ttl,
        )));
    }
    let fallback = Arc::new(StaticPriceOracle::new(config.token_prices.clone()));
    Ok(Arc::new(CachedPriceOracle::new(
        Arc::new(FallbackPriceOracle::new(live, fallback)),
        config.price_cache_ttl,
    )))
}
