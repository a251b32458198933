use std::env;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use domain::TransactionType;
use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};
use uuid::Uuid;

struct SeedAsset {
    symbol: &'static str,
    name: &'static str,
    asset_type: &'static str,
    quantity: f64,
    average_buy_price: f64,
    current_price: f64,
}

const DEMO_ASSETS: &[SeedAsset] = &[
    SeedAsset {
        symbol: "AAPL",
        name: "Apple Inc.",
        asset_type: "Stock",
        quantity: 50.0,
        average_buy_price: 150.25,
        current_price: 189.5,
    },
    SeedAsset {
        symbol: "MSFT",
        name: "Microsoft Corporation",
        asset_type: "Stock",
        quantity: 30.0,
        average_buy_price: 310.4,
        current_price: 402.1,
    },
    SeedAsset {
        symbol: "BTC/USD",
        name: "Bitcoin",
        asset_type: "Cryptocurrency",
        quantity: 0.5,
        average_buy_price: 42_000.0,
        current_price: 63_500.0,
    },
    SeedAsset {
        symbol: "ETH/USD",
        name: "Ethereum",
        asset_type: "Cryptocurrency",
        quantity: 4.0,
        average_buy_price: 2_200.0,
        current_price: 3_050.0,
    },
    SeedAsset {
        symbol: "VFIAX",
        name: "Vanguard 500 Index Fund",
        asset_type: "Mutual Fund",
        quantity: 12.0,
        average_buy_price: 380.0,
        current_price: 455.2,
    },
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    let user_id = match env::var("DEV_SEED_USER_ID") {
        Ok(raw) => Uuid::parse_str(raw.trim()).context("DEV_SEED_USER_ID must be a valid uuid")?,
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, b"portfolio-tracker-dev-user"),
    };

    seed_demo(&pool, user_id).await?;
    println!("Seeded demo portfolio for user {user_id} (dev only).");
    Ok(())
}

async fn seed_demo(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Clean previous dev seed data for this user to keep results stable.
    sqlx::query("DELETE FROM transactions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM user_assets WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now();
    for asset in DEMO_ASSETS {
        let asset_type_id = upsert_asset_type(&mut tx, asset.asset_type).await?;
        let market_asset_id: Uuid = sqlx::query_scalar(
            "INSERT INTO market_assets (id, symbol, name, asset_type_id)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (symbol) DO UPDATE
             SET name = EXCLUDED.name, asset_type_id = EXCLUDED.asset_type_id
             RETURNING id",
        )
        .bind(Uuid::new_v5(&Uuid::NAMESPACE_OID, asset.symbol.as_bytes()))
        .bind(asset.symbol)
        .bind(asset.name)
        .bind(asset_type_id)
        .fetch_one(&mut *tx)
        .await?;

        let holding_id = Uuid::new_v5(&user_id, asset.symbol.as_bytes());
        sqlx::query(
            "INSERT INTO user_assets
                (id, user_id, market_asset_id, quantity, average_buy_price, current_price)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(holding_id)
        .bind(user_id)
        .bind(market_asset_id)
        .bind(asset.quantity)
        .bind(asset.average_buy_price)
        .bind(asset.current_price)
        .execute(&mut *tx)
        .await?;

        // Two buys that average out to the recorded cost basis.
        let half = asset.quantity / 2.0;
        let fills = [
            (asset.average_buy_price * 0.95, 40, "initial position"),
            (asset.average_buy_price * 1.05, 10, "added on dip"),
        ];
        for (price_per_unit, days_ago, note) in fills {
            sqlx::query(
                "INSERT INTO transactions
                    (id, user_id, asset_id, transaction_type, quantity, price_per_unit, fees,
                     transaction_date, notes)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(holding_id)
            .bind(TransactionType::Buy.as_str())
            .bind(half)
            .bind(price_per_unit)
            .bind(1.0_f64)
            .bind(now - Duration::days(days_ago))
            .bind(note)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn upsert_asset_type(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<Uuid> {
    let id = sqlx::query_scalar(
        "INSERT INTO asset_types (id, name) VALUES ($1, $2)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id",
    )
    .bind(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    .bind(name)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}
