use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use domain::{Holding, Transaction, TransactionType};
use sqlx::{postgres::PgRow, PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Read side of the holdings store. Writes (add asset, buy, sell, remove) happen elsewhere.
#[async_trait]
pub trait HoldingsRepository: Send + Sync {
    async fn list_holdings(&self, user_id: Uuid) -> Result<Vec<Holding>>;
    async fn list_transactions(&self, user_id: Uuid, holding_id: Uuid)
        -> Result<Vec<Transaction>>;
}

#[derive(Clone)]
pub struct PostgresHoldingsRepository {
    pool: PgPool,
}

impl PostgresHoldingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HoldingsRepository for PostgresHoldingsRepository {
    async fn list_holdings(&self, user_id: Uuid) -> Result<Vec<Holding>> {
        let rows = sqlx::query(
            "SELECT ua.id, ua.user_id, ma.symbol, ma.name, ua.quantity, ua.average_buy_price,
                    ua.current_price, COALESCE(at.name, '') AS asset_type_name
             FROM user_assets ua
             JOIN market_assets ma ON ma.id = ua.market_asset_id
             LEFT JOIN asset_types at ON at.id = ma.asset_type_id
             WHERE ua.user_id = $1
             ORDER BY ua.created_at, ua.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("list user_assets failed")?;

        rows.iter().map(holding_from_row).collect()
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        holding_id: Uuid,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT id, asset_id, user_id, transaction_type, quantity, price_per_unit, fees,
                    transaction_date, notes
             FROM transactions
             WHERE user_id = $1 AND asset_id = $2
             ORDER BY transaction_date DESC, id",
        )
        .bind(user_id)
        .bind(holding_id)
        .fetch_all(&self.pool)
        .await
        .context("list transactions failed")?;

        rows.iter().map(transaction_from_row).collect()
    }
}

fn holding_from_row(row: &PgRow) -> Result<Holding> {
    let symbol: String = row.try_get("symbol")?;
    Ok(Holding {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        symbol: symbol.trim().to_uppercase(),
        name: row.try_get("name")?,
        quantity: row.try_get("quantity")?,
        average_cost: row.try_get("average_buy_price")?,
        asset_type_name: row.try_get("asset_type_name")?,
        last_known_price: row.try_get("current_price")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let raw_type: String = row.try_get("transaction_type")?;
    let transaction_type = TransactionType::parse(&raw_type)
        .ok_or_else(|| anyhow::anyhow!("unknown transaction_type {raw_type}"))?;
    Ok(Transaction {
        id: row.try_get("id")?,
        holding_id: row.try_get("asset_id")?,
        user_id: row.try_get("user_id")?,
        transaction_type,
        quantity: row.try_get("quantity")?,
        price_per_unit: row.try_get("price_per_unit")?,
        fees: row.try_get("fees")?,
        transaction_date: row.try_get("transaction_date")?,
        notes: row.try_get("notes")?,
    })
}

#[derive(Default)]
struct InMemoryData {
    holdings: HashMap<Uuid, Vec<Holding>>,
    transactions: Vec<Transaction>,
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryHoldingsRepository {
    data: RwLock<InMemoryData>,
}

impl InMemoryHoldingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_holding(&self, holding: Holding) {
        let mut data = self.data.write().await;
        data.holdings
            .entry(holding.user_id)
            .or_default()
            .push(holding);
    }

    pub async fn insert_transaction(&self, transaction: Transaction) {
        self.data.write().await.transactions.push(transaction);
    }

    /// Sample portfolio mirroring the mobile app's demo data.
    pub async fn seed_demo(&self, user_id: Uuid) {
        let demo = [
            ("AAPL", "Apple Inc.", "Stock", 50.0, 150.25),
            ("MSFT", "Microsoft Corporation", "Stock", 30.0, 310.40),
            ("BTC/USD", "Bitcoin", "Cryptocurrency", 0.5, 42000.0),
            ("ETH/USD", "Ethereum", "Cryptocurrency", 4.0, 2200.0),
            ("VFIAX", "Vanguard 500 Index Fund", "Mutual Fund", 12.0, 380.0),
        ];
        for (symbol, name, asset_type, quantity, average_cost) in demo {
            self.insert_holding(
                Holding::new(user_id, symbol, quantity, average_cost)
                    .with_name(name)
                    .with_asset_type(asset_type),
            )
            .await;
        }
    }
}

#[async_trait]
impl HoldingsRepository for InMemoryHoldingsRepository {
    async fn list_holdings(&self, user_id: Uuid) -> Result<Vec<Holding>> {
        let data = self.data.read().await;
        Ok(data.holdings.get(&user_id).cloned().unwrap_or_default())
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        holding_id: Uuid,
    ) -> Result<Vec<Transaction>> {
        let data = self.data.read().await;
        let mut list: Vec<Transaction> = data
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.holding_id == holding_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
        Ok(list)
    }
}
