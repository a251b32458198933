use std::{collections::HashMap, env, time::Duration};

use anyhow::{Context, Result};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub twelvedata_api_base: String,
    pub twelvedata_api_key: String,
    pub price_request_timeout: Duration,
    pub price_cache_ttl: Duration,
    pub price_refresh_interval: Duration,
    /// Sessions untouched for this long are closed and their timers stopped.
    pub session_idle_ttl: Duration,
    pub token_prices: HashMap<String, f64>,
    pub demo_user_id: Option<Uuid>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let price_request_timeout = parse_duration_seconds("PRICE_REQUEST_TIMEOUT_SECS", 10);
        let price_cache_ttl = parse_duration_seconds("PRICE_CACHE_TTL_SECS", 60);
        let price_refresh_interval = parse_duration_seconds("PRICE_REFRESH_INTERVAL_SECS", 300);
        let session_idle_ttl = parse_duration_seconds("SESSION_IDLE_TTL_SECS", 900);
        let token_prices = parse_token_prices("TOKEN_PRICES");

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if database_url.is_none() {
            tracing::warn!("DATABASE_URL not set. Holdings are kept in memory only");
        }
        let demo_user_id = match env::var("DEMO_USER_ID") {
            Ok(raw) => Some(
                Uuid::parse_str(raw.trim()).context("DEMO_USER_ID must be a valid uuid")?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            twelvedata_api_base: env::var("TWELVEDATA_API_BASE")
                .unwrap_or_else(|_| "https://api.twelvedata.com".to_string()),
            twelvedata_api_key: env::var("TWELVEDATA_API_KEY")
                .unwrap_or_else(|_| "demo".to_string()),
            price_request_timeout,
            price_cache_ttl,
            price_refresh_interval,
            session_idle_ttl,
            token_prices,
            demo_user_id,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("PORT must be a valid u16")?,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            twelvedata_api_base: "https://api.twelvedata.com".to_string(),
            twelvedata_api_key: "demo".to_string(),
            price_request_timeout: Duration::from_secs(10),
            price_cache_ttl: Duration::from_secs(60),
            price_refresh_interval: Duration::from_secs(300),
            session_idle_ttl: Duration::from_secs(900),
            token_prices: HashMap::new(),
            demo_user_id: None,
            port: 8081,
        }
    }
}

fn parse_duration_seconds(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

fn parse_token_prices(key: &str) -> HashMap<String, f64> {
    match env::var(key) {
        Ok(raw) => split_token_prices(&raw),
        Err(_) => HashMap::new(),
    }
}

/// Parses `SYM=price` pairs separated by commas. Malformed or non-positive entries are skipped.
fn split_token_prices(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|item| {
            let (symbol, value) = item.split_once('=')?;
            let price = value.trim().parse::<f64>().ok()?;
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() || !price.is_finite() || price <= 0.0 {
                return None;
            }
            Some((symbol, price))
        })
        .collect()
}
