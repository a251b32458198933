use anyhow::{Context, Result};
use async_trait::async_trait;
use domain::MarketAsset;
use sqlx::{postgres::PgRow, PgPool, Row};
use tokio::sync::RwLock;

pub const CATALOG_LIMIT: i64 = 1000;
pub const SEARCH_LIMIT: i64 = 50;
pub const BY_TYPE_LIMIT: i64 = 200;
const MIN_SEARCH_LEN: usize = 2;

/// Read-only catalog of tradable assets. Inactive entries are never returned.
#[async_trait]
pub trait MarketAssetRepository: Send + Sync {
    async fn list_active(&self, limit: i64) -> Result<Vec<MarketAsset>>;
    /// Case-insensitive match on symbol or name. Queries shorter than two characters match nothing.
    async fn search(&self, query: &str) -> Result<Vec<MarketAsset>>;
    async fn find_by_symbol(&self, symbol: &str) -> Result<Option<MarketAsset>>;
    async fn list_by_type(&self, asset_type_name: &str) -> Result<Vec<MarketAsset>>;
}

const SELECT_ACTIVE: &str = "SELECT ma.id, ma.symbol, ma.name,
        COALESCE(at.name, '') AS asset_type_name, at.description AS asset_type_description
     FROM market_assets ma
     LEFT JOIN asset_types at ON at.id = ma.asset_type_id
     WHERE ma.is_active";

#[derive(Clone)]
pub struct PostgresMarketAssetRepository {
    pool: PgPool,
}

impl PostgresMarketAssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketAssetRepository for PostgresMarketAssetRepository {
    async fn list_active(&self, limit: i64) -> Result<Vec<MarketAsset>> {
        let rows = sqlx::query(&format!("{SELECT_ACTIVE} ORDER BY ma.symbol LIMIT $1"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("list market_assets failed")?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn search(&self, query: &str) -> Result<Vec<MarketAsset>> {
        let Some(term) = search_term(query) else {
            return Ok(Vec::new());
        };
        let pattern = format!("%{}%", escape_like(term));
        let rows = sqlx::query(&format!(
            "{SELECT_ACTIVE} AND (ma.symbol ILIKE $1 OR ma.name ILIKE $1)
             ORDER BY ma.symbol LIMIT $2"
        ))
        .bind(pattern)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("search market_assets failed")?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Option<MarketAsset>> {
        let row = sqlx::query(&format!("{SELECT_ACTIVE} AND ma.symbol = $1"))
            .bind(symbol.trim().to_uppercase())
            .fetch_optional(&self.pool)
            .await
            .context("find market_asset failed")?;
        row.as_ref().map(asset_from_row).transpose()
    }

    async fn list_by_type(&self, asset_type_name: &str) -> Result<Vec<MarketAsset>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ACTIVE} AND at.name = $1 ORDER BY ma.symbol LIMIT $2"
        ))
        .bind(asset_type_name.trim())
        .bind(BY_TYPE_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("list market_assets by type failed")?;
        rows.iter().map(asset_from_row).collect()
    }
}

fn asset_from_row(row: &PgRow) -> Result<MarketAsset> {
    Ok(MarketAsset {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        asset_type_name: row.try_get("asset_type_name")?,
        asset_type_description: row.try_get("asset_type_description")?,
    })
}

fn search_term(query: &str) -> Option<&str> {
    let term = query.trim();
    (term.chars().count() >= MIN_SEARCH_LEN).then_some(term)
}

/// Escapes `ILIKE` wildcards so user input matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

struct CatalogEntry {
    asset: MarketAsset,
    active: bool,
}

/// Process-local catalog, used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryMarketAssetRepository {
    entries: RwLock<Vec<CatalogEntry>>,
}

impl InMemoryMarketAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_asset(&self, asset: MarketAsset, active: bool) {
        self.entries.write().await.push(CatalogEntry { asset, active });
    }

    /// Catalog covering the in-memory demo portfolio, plus one asset it does not hold.
    pub async fn seed_demo(&self) {
        let demo = [
            ("AAPL", "Apple Inc.", "Stock"),
            ("MSFT", "Microsoft Corporation", "Stock"),
            ("TSLA", "Tesla, Inc.", "Stock"),
            ("BTC/USD", "Bitcoin", "Cryptocurrency"),
            ("ETH/USD", "Ethereum", "Cryptocurrency"),
            ("VFIAX", "Vanguard 500 Index Fund", "Mutual Fund"),
        ];
        for (symbol, name, asset_type) in demo {
            self.insert_asset(MarketAsset::new(symbol, name, asset_type), true)
                .await;
        }
    }

    async fn active_sorted<F>(&self, keep: F, limit: i64) -> Vec<MarketAsset>
    where
        F: Fn(&MarketAsset) -> bool,
    {
        let entries = self.entries.read().await;
        let mut assets: Vec<MarketAsset> = entries
            .iter()
            .filter(|entry| entry.active && keep(&entry.asset))
            .map(|entry| entry.asset.clone())
            .collect();
        assets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        assets.truncate(usize::try_from(limit).unwrap_or(0));
        assets
    }
}

#[async_trait]
impl MarketAssetRepository for InMemoryMarketAssetRepository {
    async fn list_active(&self, limit: i64) -> Result<Vec<MarketAsset>> {
        Ok(self.active_sorted(|_| true, limit).await)
    }

    async fn search(&self, query: &str) -> Result<Vec<MarketAsset>> {
        let Some(term) = search_term(query) else {
            return Ok(Vec::new());
        };
        let needle = term.to_lowercase();
        Ok(self
            .active_sorted(
                |asset| {
                    asset.symbol.to_lowercase().contains(&needle)
                        || asset.name.to_lowercase().contains(&needle)
                },
                SEARCH_LIMIT,
            )
            .await)
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Option<MarketAsset>> {
        let symbol = symbol.trim().to_uppercase();
        Ok(self
            .active_sorted(|asset| asset.symbol == symbol, 1)
            .await
            .into_iter()
            .next())
    }

    async fn list_by_type(&self, asset_type_name: &str) -> Result<Vec<MarketAsset>> {
        let wanted = asset_type_name.trim();
        Ok(self
            .active_sorted(|asset| asset.asset_type_name == wanted, BY_TYPE_LIMIT)
            .await)
    }
}
