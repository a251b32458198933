use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Last-traded price per uppercase symbol. A symbol without a quote is absent.
pub type PriceMap = HashMap<String, f64>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Holding {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub quantity: f64,
    pub average_cost: f64,
    #[serde(default)]
    pub asset_type_name: String,
    /// Price seen on a previous pass, used when the oracle has nothing newer.
    #[serde(default)]
    pub last_known_price: Option<f64>,
}

impl Holding {
    pub fn new(user_id: Uuid, symbol: &str, quantity: f64, average_cost: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            symbol: symbol.trim().to_uppercase(),
            name: String::new(),
            quantity,
            average_cost,
            asset_type_name: String::new(),
            last_known_price: None,
        }
    }

    pub fn with_asset_type(mut self, asset_type_name: impl Into<String>) -> Self {
        self.asset_type_name = asset_type_name.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_last_known_price(mut self, price: f64) -> Self {
        self.last_known_price = Some(price);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Live,
    LastKnown,
    Missing,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnrichedHolding {
    #[serde(flatten)]
    pub holding: Holding,
    pub current_price: f64,
    pub price_source: PriceSource,
    pub total_value: f64,
    pub total_cost: f64,
    pub profit_loss: f64,
    pub profit_loss_percentage: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PortfolioSummary {
    pub total_value: f64,
    pub total_cost: f64,
    pub total_profit_loss: f64,
    pub total_profit_loss_percentage: f64,
    pub holding_count: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AllocationSlice {
    pub asset_type_name: String,
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortfolioView {
    pub user_id: Uuid,
    pub holdings: Vec<EnrichedHolding>,
    pub summary: PortfolioSummary,
    pub allocation: Vec<AllocationSlice>,
    /// Set when the price feed failed and values fell back to stale or zero prices.
    pub stale: bool,
    pub refreshed_at: DateTime<Utc>,
    pub generation: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Buy => "buy",
            TransactionType::Sell => "sell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "buy" => Some(TransactionType::Buy),
            "sell" => Some(TransactionType::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub holding_id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub quantity: f64,
    pub price_per_unit: f64,
    #[serde(default)]
    pub fees: f64,
    pub transaction_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Transaction {
    /// Gross amount of the trade; fees are added for buys and sells alike.
    pub fn total_amount(&self) -> f64 {
        self.quantity * self.price_per_unit + self.fees
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct TransactionResponse {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub total_amount: f64,
}

impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        let total_amount = transaction.total_amount();
        Self {
            transaction,
            total_amount,
        }
    }
}

/// Catalog entry a holding can be opened against. Only active entries are listed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MarketAsset {
    pub id: Uuid,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub asset_type_name: String,
    #[serde(default)]
    pub asset_type_description: Option<String>,
}

impl MarketAsset {
    pub fn new(symbol: &str, name: &str, asset_type_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.trim().to_uppercase(),
            name: name.to_string(),
            asset_type_name: asset_type_name.to_string(),
            asset_type_description: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
