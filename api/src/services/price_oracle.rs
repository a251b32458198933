use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use domain::PriceMap;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, warn};
use valuation::{OracleError, OracleResult, PriceOracle};

/// Quotes from the Twelve Data `/price` endpoint.
#[derive(Clone)]
pub struct TwelveDataPriceOracle {
    client: Client,
    api_base: String,
    api_key: String,
}

impl TwelveDataPriceOracle {
    pub fn new(api_base: String, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build quote http client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PriceOracle for TwelveDataPriceOracle {
    async fn latest_prices(&self, symbols: &[String]) -> OracleResult<PriceMap> {
        if symbols.is_empty() {
            return Ok(PriceMap::new());
        }
        let url = format!("{}/price", self.api_base);
        let joined = symbols.join(",");
        let resp = self
            .client
            .get(url)
            .query(&[("symbol", joined.as_str()), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|err| OracleError::Network(err.to_string()))?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|err| OracleError::Decode(err.to_string()))?;
        let prices = parse_price_response(symbols, &body)?;
        debug!(
            requested = symbols.len(),
            received = prices.len(),
            "twelvedata prices fetched"
        );
        Ok(prices)
    }
}

/// Reads a `/price` body. A single symbol comes back as `{"price": "193.87"}`,
/// several as `{"AAPL": {"price": "193.87"}, ...}`. Per-symbol errors are omitted.
pub fn parse_price_response(symbols: &[String], body: &Value) -> OracleResult<PriceMap> {
    if let Some(code) = error_code(body) {
        return match code {
            429 => Err(OracleError::RateLimited),
            // An unknown symbol on a single-symbol request is just a missing quote.
            400 | 404 if symbols.len() == 1 => Ok(PriceMap::new()),
            code => Err(OracleError::Status(u16::try_from(code).unwrap_or(0))),
        };
    }

    if !body.is_object() {
        return Err(OracleError::Decode("expected a json object".to_string()));
    }

    let prices = if let [symbol] = symbols {
        price_value(body.get("price"))
            .map(|price| (symbol.clone(), price))
            .into_iter()
            .collect()
    } else {
        symbols
            .iter()
            .filter_map(|symbol| {
                let entry = body.get(symbol)?;
                if error_code(entry).is_some() {
                    return None;
                }
                price_value(entry.get("price")).map(|price| (symbol.clone(), price))
            })
            .collect()
    };
    Ok(prices)
}

fn error_code(value: &Value) -> Option<i64> {
    let is_error = value.get("status").and_then(Value::as_str) == Some("error");
    is_error.then(|| value.get("code").and_then(Value::as_i64).unwrap_or(0))
}

fn price_value(value: Option<&Value>) -> Option<f64> {
    let price = match value? {
        Value::String(raw) => raw.trim().parse::<f64>().ok()?,
        Value::Number(num) => num.as_f64()?,
        _ => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Fixed prices, typically configured through `TOKEN_PRICES`.
#[derive(Clone)]
pub struct StaticPriceOracle {
    prices: HashMap<String, f64>,
}

impl StaticPriceOracle {
    pub fn new(prices: HashMap<String, f64>) -> Self {
        let prices = prices
            .into_iter()
            .map(|(symbol, price)| (symbol.to_uppercase(), price))
            .collect();
        Self { prices }
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn latest_prices(&self, symbols: &[String]) -> OracleResult<PriceMap> {
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                self.prices
                    .get(&symbol.to_uppercase())
                    .map(|price| (symbol.clone(), *price))
            })
            .collect())
    }
}

/// Asks `fallback` for whatever `primary` could not price.
#[derive(Clone)]
pub struct FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    primary: Arc<P>,
    fallback: Arc<F>,
}

impl<P, F> FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    pub fn new(primary: Arc<P>, fallback: Arc<F>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P, F> PriceOracle for FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    async fn latest_prices(&self, symbols: &[String]) -> OracleResult<PriceMap> {
        let (mut prices, primary_err) = match self.primary.latest_prices(symbols).await {
            Ok(prices) => (prices, None),
            Err(err) => {
                warn!(error = %err, "primary oracle failed, trying fallback");
                (err.salvaged().cloned().unwrap_or_default(), Some(err))
            }
        };
        let missing = unpriced(symbols, &prices);
        if !missing.is_empty() {
            match self.fallback.latest_prices(&missing).await {
                Ok(extra) => {
                    debug!(
                        missing = missing.len(),
                        filled = extra.len(),
                        "fallback oracle filled missing quotes"
                    );
                    prices.extend(extra);
                }
                Err(fallback_err) => match &primary_err {
                    Some(primary_err) if prices.is_empty() => {
                        return Err(OracleError::Unavailable(format!(
                            "primary: {}; fallback: {fallback_err}",
                            primary_err.cause()
                        )));
                    }
                    _ => {
                        warn!(error = %fallback_err, "fallback oracle failed for missing quotes");
                    }
                },
            }
        }

        // A primary failure stays visible even when the fallback covered for it.
        match primary_err {
            None => Ok(prices),
            Some(err) if prices.is_empty() => Err(err),
            Some(err) => Err(OracleError::Degraded {
                cause: err.cause(),
                prices,
            }),
        }
    }
}

fn unpriced(symbols: &[String], prices: &PriceMap) -> Vec<String> {
    symbols
        .iter()
        .filter(|symbol| !prices.contains_key(*symbol))
        .cloned()
        .collect()
}

#[derive(Clone, Copy)]
struct CachedPrice {
    price: f64,
    fetched_at: Instant,
}

/// Keeps quotes for `ttl` and only asks the inner oracle for expired or unseen symbols.
///
/// When the inner oracle fails, fresh hits and expired entries are still served
/// inside `OracleError::Degraded`; the bare error surfaces only if nothing is cached.
#[derive(Clone)]
pub struct CachedPriceOracle<O> {
    inner: Arc<O>,
    cache: Arc<RwLock<HashMap<String, CachedPrice>>>,
    ttl: Duration,
}

impl<O> CachedPriceOracle<O> {
    pub fn new(inner: Arc<O>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl: ttl.max(Duration::from_secs(1)),
        }
    }
}

#[async_trait]
impl<O> PriceOracle for CachedPriceOracle<O>
where
    O: PriceOracle,
{
    async fn latest_prices(&self, symbols: &[String]) -> OracleResult<PriceMap> {
        let mut prices = PriceMap::new();
        let mut misses = Vec::new();
        {
            let cache = self.cache.read().await;
            for symbol in symbols {
                match cache.get(symbol) {
                    Some(entry) if entry.fetched_at.elapsed() <= self.ttl => {
                        prices.insert(symbol.clone(), entry.price);
                    }
                    _ => misses.push(symbol.clone()),
                }
            }
        }
        if misses.is_empty() {
            return Ok(prices);
        }

        let fetched = match self.inner.latest_prices(&misses).await {
            Ok(fetched) => fetched,
            Err(err) => return Err(self.salvage(prices, &misses, err).await),
        };
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        for (symbol, price) in fetched {
            cache.insert(
                symbol.clone(),
                CachedPrice {
                    price,
                    fetched_at: now,
                },
            );
            prices.insert(symbol, price);
        }
        Ok(prices)
    }
}

impl<O> CachedPriceOracle<O> {
    async fn salvage(
        &self,
        mut prices: PriceMap,
        misses: &[String],
        err: OracleError,
    ) -> OracleError {
        let mut expired = 0;
        {
            let cache = self.cache.read().await;
            for symbol in misses {
                if let Some(entry) = cache.get(symbol) {
                    prices.insert(symbol.clone(), entry.price);
                    expired += 1;
                }
            }
        }
        // Prices salvaged upstream are served but not cached, so the next call retries.
        if let Some(upstream) = err.salvaged() {
            for (symbol, price) in upstream {
                prices.entry(symbol.clone()).or_insert(*price);
            }
        }
        if prices.is_empty() {
            return err;
        }
        warn!(
            error = %err,
            served = prices.len(),
            expired,
            "quote refresh failed, serving cached prices"
        );
        OracleError::Degraded {
            cause: err.cause(),
            prices,
        }
    }
}
