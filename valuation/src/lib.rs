use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::{AllocationSlice, EnrichedHolding, Holding, PortfolioSummary, PriceMap, PriceSource};
use thiserror::Error;
use tracing::{debug, warn};

const UNKNOWN_ASSET_TYPE: &str = "Unknown";

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("network error: {0}")]
    Network(String),
    #[error("quote provider returned status {0}")]
    Status(u16),
    #[error("quote provider rate limit exceeded")]
    RateLimited,
    #[error("failed to decode quote response: {0}")]
    Decode(String),
    #[error("quote provider unavailable: {0}")]
    Unavailable(String),
    /// The feed failed but some prices could still be served from a cache or fallback.
    #[error("quote feed degraded ({} prices salvaged): {cause}", .prices.len())]
    Degraded { prices: PriceMap, cause: String },
}

impl OracleError {
    /// Prices that survived the failure, if any.
    pub fn salvaged(&self) -> Option<&PriceMap> {
        match self {
            OracleError::Degraded { prices, .. } => Some(prices),
            _ => None,
        }
    }

    /// Root failure, without the salvage wrapper.
    pub fn cause(&self) -> String {
        match self {
            OracleError::Degraded { cause, .. } => cause.clone(),
            other => other.to_string(),
        }
    }
}

pub type OracleResult<T> = Result<T, OracleError>;

/// Source of last-traded prices.
///
/// Callers pass a non-empty, deduplicated list of uppercase symbols. Symbols the
/// provider does not know are left out of the map; only a failure of the whole
/// request is an error.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn latest_prices(&self, symbols: &[String]) -> OracleResult<PriceMap>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub holdings: Vec<EnrichedHolding>,
    /// True when the oracle call failed. Salvaged prices may still have been applied.
    pub stale: bool,
}

/// Distinct non-blank symbols in order of first appearance.
pub fn distinct_symbols(holdings: &[Holding]) -> Vec<String> {
    let mut seen = HashSet::new();
    holdings
        .iter()
        .map(|h| h.symbol.trim())
        .filter(|symbol| !symbol.is_empty())
        .filter(|symbol| seen.insert(symbol.to_string()))
        .map(str::to_string)
        .collect()
}

/// Combines holdings with a quote map, one output per input in the same order.
pub fn enrich_with_quotes(holdings: &[Holding], quotes: &PriceMap) -> Vec<EnrichedHolding> {
    holdings
        .iter()
        .map(|holding| {
            let live = quotes
                .get(holding.symbol.trim())
                .copied()
                .filter(|p| usable_price(*p));
            let last_known = holding.last_known_price.filter(|p| usable_price(*p));
            let (current_price, price_source) = match (live, last_known) {
                (Some(price), _) => (price, PriceSource::Live),
                (None, Some(price)) => (price, PriceSource::LastKnown),
                (None, None) => (0.0, PriceSource::Missing),
            };
            let total_value = current_price * holding.quantity;
            let total_cost = holding.average_cost * holding.quantity;
            let profit_loss = total_value - total_cost;
            EnrichedHolding {
                holding: holding.clone(),
                current_price,
                price_source,
                total_value,
                total_cost,
                profit_loss,
                profit_loss_percentage: percentage_of(profit_loss, total_cost),
            }
        })
        .collect()
}

/// Fetches quotes for the holdings' symbols and enriches them.
///
/// An oracle failure never escapes: `stale` is set and holdings are priced from
/// whatever the failure salvaged, then their last known value, then zero.
pub async fn enrich_holdings(holdings: &[Holding], oracle: &dyn PriceOracle) -> Enrichment {
    if holdings.is_empty() {
        return Enrichment {
            holdings: Vec::new(),
            stale: false,
        };
    }

    let symbols = distinct_symbols(holdings);
    if symbols.is_empty() {
        return Enrichment {
            holdings: enrich_with_quotes(holdings, &PriceMap::new()),
            stale: false,
        };
    }

    let (quotes, stale) = match oracle.latest_prices(&symbols).await {
        Ok(quotes) => {
            debug!(
                requested = symbols.len(),
                received = quotes.len(),
                "quotes fetched"
            );
            (quotes, false)
        }
        Err(err) => {
            warn!(error = %err, symbols = ?symbols, "price oracle failed, using fallback prices");
            metrics::counter!("valuation_oracle_failures_total").increment(1);
            (err.salvaged().cloned().unwrap_or_default(), true)
        }
    };

    Enrichment {
        holdings: enrich_with_quotes(holdings, &quotes),
        stale,
    }
}

pub fn summarize(holdings: &[EnrichedHolding]) -> PortfolioSummary {
    let (total_value, total_cost) = holdings.iter().fold((0.0, 0.0), |(value, cost), h| {
        (value + h.total_value, cost + h.total_cost)
    });
    let total_profit_loss = total_value - total_cost;
    PortfolioSummary {
        total_value,
        total_cost,
        total_profit_loss,
        total_profit_loss_percentage: percentage_of(total_profit_loss, total_cost),
        holding_count: holdings.len(),
    }
}

/// Market value grouped by asset type, ordered by first appearance.
/// Groups worth nothing are left out.
pub fn allocation_by_type(holdings: &[EnrichedHolding]) -> Vec<AllocationSlice> {
    let mut order: Vec<String> = Vec::new();
    let mut values: HashMap<String, f64> = HashMap::new();
    for h in holdings {
        let name = match h.holding.asset_type_name.trim() {
            "" => UNKNOWN_ASSET_TYPE.to_string(),
            name => name.to_string(),
        };
        let entry = values.entry(name.clone()).or_insert_with(|| {
            order.push(name);
            0.0
        });
        *entry += h.total_value;
    }

    let slices: Vec<(String, f64)> = order
        .into_iter()
        .filter_map(|name| {
            let value = values.get(&name).copied().unwrap_or(0.0);
            (value > 0.0).then_some((name, value))
        })
        .collect();
    let total: f64 = slices.iter().map(|(_, value)| value).sum();

    slices
        .into_iter()
        .map(|(asset_type_name, value)| AllocationSlice {
            asset_type_name,
            value,
            percentage: percentage_of(value, total),
        })
        .collect()
}

fn usable_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

fn percentage_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}
