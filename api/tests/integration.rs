use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use domain::{Holding, MarketAsset, PriceMap, Transaction, TransactionType};
use serde_json::Value;
use tower::ServiceExt;
use tracker_api::{
    app::build_router,
    config::AppConfig,
    repositories::{
        HoldingsRepository, InMemoryHoldingsRepository, InMemoryMarketAssetRepository,
        MarketAssetRepository,
    },
    services::StaticPriceOracle,
    state::AppState,
};
use uuid::Uuid;
use valuation::{OracleError, OracleResult, PriceOracle};

struct DownOracle;

#[async_trait]
impl PriceOracle for DownOracle {
    async fn latest_prices(&self, _symbols: &[String]) -> OracleResult<PriceMap> {
        Err(OracleError::RateLimited)
    }
}

struct BrokenRepository;

#[async_trait]
impl HoldingsRepository for BrokenRepository {
    async fn list_holdings(&self, _user_id: Uuid) -> anyhow::Result<Vec<Holding>> {
        Err(anyhow!("connection refused"))
    }

    async fn list_transactions(
        &self,
        _user_id: Uuid,
        _holding_id: Uuid,
    ) -> anyhow::Result<Vec<Transaction>> {
        Err(anyhow!("connection refused"))
    }
}

fn quotes() -> Arc<StaticPriceOracle> {
    Arc::new(StaticPriceOracle::new(HashMap::from([
        ("AAPL".to_string(), 200.0),
        ("BTC/USD".to_string(), 60_000.0),
    ])))
}

async fn seeded_repo(user_id: Uuid) -> (Arc<InMemoryHoldingsRepository>, Uuid) {
    let repo = Arc::new(InMemoryHoldingsRepository::new());
    let apple = Holding::new(user_id, "AAPL", 10.0, 150.0)
        .with_name("Apple Inc.")
        .with_asset_type("Stock")
        .with_last_known_price(180.0);
    let apple_id = apple.id;
    repo.insert_holding(apple).await;
    repo.insert_holding(
        Holding::new(user_id, "BTC/USD", 0.5, 40_000.0).with_asset_type("Cryptocurrency"),
    )
    .await;
    (repo, apple_id)
}

struct BrokenCatalog;

#[async_trait]
impl MarketAssetRepository for BrokenCatalog {
    async fn list_active(&self, _limit: i64) -> anyhow::Result<Vec<MarketAsset>> {
        Err(anyhow!("connection refused"))
    }

    async fn search(&self, _query: &str) -> anyhow::Result<Vec<MarketAsset>> {
        Err(anyhow!("connection refused"))
    }

    async fn find_by_symbol(&self, _symbol: &str) -> anyhow::Result<Option<MarketAsset>> {
        Err(anyhow!("connection refused"))
    }

    async fn list_by_type(&self, _asset_type_name: &str) -> anyhow::Result<Vec<MarketAsset>> {
        Err(anyhow!("connection refused"))
    }
}

fn router_with(repo: Arc<dyn HoldingsRepository>, oracle: Arc<dyn PriceOracle>) -> Router {
    let catalog = Arc::new(InMemoryMarketAssetRepository::new());
    build_router(AppState::new(&AppConfig::default(), repo, catalog, oracle))
}

async fn catalog_router() -> Router {
    let catalog = InMemoryMarketAssetRepository::new();
    catalog.seed_demo().await;
    catalog
        .insert_asset(MarketAsset::new("LUNA", "Terra", "Cryptocurrency"), false)
        .await;
    build_router(AppState::new(
        &AppConfig::default(),
        Arc::new(InMemoryHoldingsRepository::new()),
        Arc::new(catalog),
        quotes(),
    ))
}

fn portfolio_uri(user_id: Uuid) -> String {
    format!("/api/users/{user_id}/portfolio")
}

fn symbols(body: &Value) -> Vec<&str> {
    body.as_array()
        .expect("asset list")
        .iter()
        .filter_map(|asset| asset["symbol"].as_str())
        .collect()
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("router response");
    let status = response.status();
    let body = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("json")
    };
    (status, json)
}

#[tokio::test]
async fn healthz_reports_ok() {
    let router = router_with(Arc::new(InMemoryHoldingsRepository::new()), quotes());
    let (status, body) = send(&router, Method::GET, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["open_sessions"], 0);
}

#[tokio::test]
async fn portfolio_is_enriched_with_live_quotes() {
    let user_id = Uuid::new_v4();
    let (repo, _) = seeded_repo(user_id).await;
    let router = router_with(repo, quotes());

    let (status, view) = send(&router, Method::GET, &portfolio_uri(user_id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["stale"], false);
    assert_eq!(view["generation"], 1);
    let holdings = view["holdings"].as_array().expect("holdings");
    assert_eq!(holdings.len(), 2);
    assert_eq!(holdings[0]["symbol"], "AAPL");
    assert_eq!(holdings[0]["current_price"], 200.0);
    assert_eq!(holdings[0]["price_source"], "live");
    assert_eq!(holdings[0]["total_value"], 2000.0);
    assert_eq!(holdings[0]["profit_loss"], 500.0);
    assert_eq!(view["summary"]["total_value"], 32_000.0);
    assert_eq!(view["summary"]["total_cost"], 21_500.0);
    assert_eq!(view["allocation"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn oracle_outage_serves_last_known_prices_marked_stale() {
    let user_id = Uuid::new_v4();
    let (repo, _) = seeded_repo(user_id).await;
    let router = router_with(repo, Arc::new(DownOracle));

    let (status, view) = send(&router, Method::GET, &portfolio_uri(user_id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["stale"], true);
    let holdings = view["holdings"].as_array().expect("holdings");
    assert_eq!(holdings[0]["current_price"], 180.0);
    assert_eq!(holdings[0]["price_source"], "last_known");
    assert_eq!(holdings[1]["current_price"], 0.0);
    assert_eq!(holdings[1]["price_source"], "missing");
    assert_eq!(holdings[1]["profit_loss"], -20_000.0);
}

#[tokio::test]
async fn holdings_failure_is_service_unavailable() {
    let router = router_with(Arc::new(BrokenRepository), quotes());
    let user_id = Uuid::new_v4();

    let (status, body) = send(&router, Method::GET, &portfolio_uri(user_id)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let message = body["error"].as_str().expect("error message");
    assert!(message.contains("connection refused"));
}

#[tokio::test]
async fn empty_portfolio_has_zero_summary() {
    let router = router_with(
        Arc::new(InMemoryHoldingsRepository::new()),
        Arc::new(DownOracle),
    );
    let user_id = Uuid::new_v4();

    let (status, view) = send(&router, Method::GET, &portfolio_uri(user_id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["stale"], false);
    assert_eq!(view["holdings"].as_array().map(Vec::len), Some(0));
    assert_eq!(view["summary"]["total_value"], 0.0);
    assert_eq!(view["summary"]["total_profit_loss_percentage"], 0.0);
}

#[tokio::test]
async fn session_lifecycle_and_refresh_kinds() {
    let user_id = Uuid::new_v4();
    let (repo, _) = seeded_repo(user_id).await;
    let router = router_with(repo, quotes());
    let session = format!("/api/users/{user_id}/portfolio/session");

    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/users/{user_id}/portfolio/prices/refresh"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, view) = send(&router, Method::POST, &session).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["generation"], 1);

    let (status, view) = send(
        &router,
        Method::POST,
        &format!("/api/users/{user_id}/portfolio/refresh"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["generation"], 2);

    let (status, view) = send(
        &router,
        Method::POST,
        &format!("/api/users/{user_id}/portfolio/prices/refresh"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["generation"], 3);
    assert_eq!(view["holdings"].as_array().map(Vec::len), Some(2));

    let (_, health) = send(&router, Method::GET, "/healthz").await;
    assert_eq!(health["open_sessions"], 1);

    let (status, _) = send(&router, Method::DELETE, &session).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&router, Method::DELETE, &session).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transactions_are_listed_with_totals() {
    let user_id = Uuid::new_v4();
    let (repo, apple_id) = seeded_repo(user_id).await;
    repo.insert_transaction(Transaction {
        id: Uuid::new_v4(),
        holding_id: apple_id,
        user_id,
        transaction_type: TransactionType::Buy,
        quantity: 10.0,
        price_per_unit: 150.0,
        fees: 5.0,
        transaction_date: Utc::now(),
        notes: Some("initial position".to_string()),
    })
    .await;
    let router = router_with(repo, quotes());

    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/users/{user_id}/holdings/{apple_id}/transactions"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().expect("transactions");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["transaction_type"], "buy");
    assert_eq!(list[0]["total_amount"], 1505.0);
}

#[tokio::test]
async fn transaction_listing_failure_is_internal_error() {
    let router = router_with(Arc::new(BrokenRepository), quotes());
    let uri = format!(
        "/api/users/{}/holdings/{}/transactions",
        Uuid::new_v4(),
        Uuid::new_v4()
    );

    let (status, body) = send(&router, Method::GET, &uri).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "failed to load transactions");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let router = router_with(Arc::new(InMemoryHoldingsRepository::new()), quotes());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("router response");

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn asset_catalog_lists_active_entries_by_symbol() {
    let router = catalog_router().await;

    let (status, body) = send(&router, Method::GET, "/api/assets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        symbols(&body),
        vec!["AAPL", "BTC/USD", "ETH/USD", "MSFT", "TSLA", "VFIAX"]
    );

    let (_, body) = send(&router, Method::GET, "/api/assets?limit=2").await;
    assert_eq!(symbols(&body), vec!["AAPL", "BTC/USD"]);
}

#[tokio::test]
async fn asset_search_and_type_filters() {
    let router = catalog_router().await;

    let (status, body) = send(&router, Method::GET, "/api/assets?query=micro").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(symbols(&body), vec!["MSFT"]);

    let (_, body) = send(&router, Method::GET, "/api/assets?query=m").await;
    assert!(symbols(&body).is_empty());

    let (_, body) = send(&router, Method::GET, "/api/assets?type=Cryptocurrency").await;
    assert_eq!(symbols(&body), vec!["BTC/USD", "ETH/USD"]);
    assert_eq!(body[0]["asset_type_name"], "Cryptocurrency");

    let (_, body) = send(&router, Method::GET, "/api/assets?query=in&type=Stock").await;
    assert_eq!(symbols(&body), vec!["AAPL", "TSLA"]);
}

#[tokio::test]
async fn asset_lookup_by_symbol() {
    let router = catalog_router().await;

    let (status, body) = send(&router, Method::GET, "/api/assets/btc%2Fusd").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbol"], "BTC/USD");
    assert_eq!(body["name"], "Bitcoin");

    let (status, body) = send(&router, Method::GET, "/api/assets/LUNA").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown asset LUNA");
}

#[tokio::test]
async fn asset_catalog_failure_is_internal_error() {
    let router = build_router(AppState::new(
        &AppConfig::default(),
        Arc::new(InMemoryHoldingsRepository::new()),
        Arc::new(BrokenCatalog),
        quotes(),
    ));

    let (status, body) = send(&router, Method::GET, "/api/assets?query=apple").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "failed to load market assets");
}
