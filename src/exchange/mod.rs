//! Exchange gateway: the capability set the engine trades through.
//!
//! Two implementations exist, selected at construction: [`LiveExchange`]
//! (REST venue) and [`SyntheticExchange`] (seeded mean-reverting walk). The
//! gateway never switches venue on its own. It reports typed errors and the
//! engine decides whether to fall back.

mod live;
mod retry;
mod synthetic;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CandleSeries, Side};

pub use live::{LiveExchange, LIVE_BASE_URL};
pub use retry::RetryPolicy;
pub use synthetic::{SyntheticConfig, SyntheticExchange};

/// Which implementation is serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Live,
    Synthetic,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Live => "live",
            Venue::Synthetic => "synthetic",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(Venue::Live),
            "synthetic" | "simulation" | "sim" => Ok(Venue::Synthetic),
            other => Err(format!("unknown exchange mode '{other}' (expected live or synthetic)")),
        }
    }
}

/// Gateway failures, split by whether retrying can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// Transient faults are retried and may trigger the synthetic fallback.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Connectivity(_) | ExchangeError::RateLimited(_))
    }
}

/// Latest ticker for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Balance of one currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

/// Per-currency account balances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    currencies: HashMap<String, CurrencyBalance>,
}

impl Balances {
    pub fn insert(&mut self, currency: impl Into<String>, balance: CurrencyBalance) {
        self.currencies.insert(currency.into(), balance);
    }

    pub fn get(&self, currency: &str) -> Option<&CurrencyBalance> {
        self.currencies.get(currency)
    }

    /// Free balance, zero for unknown currencies.
    pub fn free(&self, currency: &str) -> Decimal {
        self.get(currency).map(|b| b.free).unwrap_or_default()
    }

    pub fn total(&self, currency: &str) -> Decimal {
        self.get(currency).map(|b| b.total).unwrap_or_default()
    }
}

/// Market order with optional protective exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    /// Base-currency quantity
    pub amount: Decimal,
    pub leverage: u32,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Only shrink an existing position, never open or flip one
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Plain market order without leverage change or protective exits.
    pub fn market(symbol: impl Into<String>, side: Side, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            amount,
            leverage: 1,
            stop_loss: None,
            take_profit: None,
            reduce_only: false,
        }
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    /// Attach protective stop-loss and take-profit triggers.
    pub fn with_exits(mut self, stop_loss: Decimal, take_profit: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    /// Mark as a closing order. The venue rejects it instead of opening a
    /// new position when the protective exits already flattened the old one.
    pub fn closing(mut self) -> Self {
        self.reduce_only = true;
        self.stop_loss = None;
        self.take_profit = None;
        self
    }
}

/// Accepted order as reported by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub amount: Decimal,
    /// Average fill price, `None` if the venue did not report one
    pub price: Option<Decimal>,
    pub fee: Decimal,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Capability set the engine consumes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn venue(&self) -> Venue;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<CandleSeries, ExchangeError>;

    async fn fetch_balance(&self) -> Result<Balances, ExchangeError>;

    async fn create_market_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError>;

    async fn is_connected(&self) -> bool;
}

/// Split `BTC/USDT` into (`BTC`, `USDT`).
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}
