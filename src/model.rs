//! Shared data types passed between providers, the arbitrage engine, and the
//! pump engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trading category requested from a provider's ticker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Spot,
    Linear,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Spot => "spot",
            Category::Linear => "linear",
        }
    }
}

/// Which side of the book a trade executed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// A single normalized trade, produced by a WSClient and discarded after one
/// dispatch hop.
#[derive(Debug, Clone)]
pub struct Trade {
    pub symbol: String,
    pub ts_ms: i64,
    pub price: f64,
    pub volume: f64,
    pub side: Side,
}

impl Trade {
    pub fn usdt_amount(&self) -> f64 {
        self.price * self.volume
    }
}

/// Snapshot ticker data pulled once at startup.
#[derive(Debug, Clone, Default)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub turnover_24h: f64,
}

/// The most recent (price, ts) for a (symbol, exchange) pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct PricePoint {
    pub price: f64,
    pub ts_ms: i64,
}

/// symbol -> exchange_name -> PricePoint, owned single-writer by the
/// ArbitrageBot main loop.
pub type Prices = HashMap<String, HashMap<String, PricePoint>>;

/// Lifecycle phase of an arbitrage opportunity between two venues for one
/// symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpreadStatus {
    Opened,
    Updated,
    Closed,
}

/// Emitted by `SpreadDetector::detect`, consumed exactly once by the
/// SignalHandler.
#[derive(Debug, Clone)]
pub struct SpreadEvent {
    pub status: SpreadStatus,
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub from_spread_percent: f64,
    pub max_spread_percent: f64,
}

/// Row persisted by a `SpreadRepository` for one active or historical spread.
#[derive(Debug, Clone)]
pub struct ArbitrageSpread {
    pub id: uuid::Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread_percent: f64,
    pub max_spread_percent: f64,
    pub status: SpreadStatus,
}

/// Filter predicate used to find/update the active row for a
/// (symbol, buy_ex, sell_ex) key.
#[derive(Debug, Clone, Default)]
pub struct FindFilter {
    pub symbol: Option<String>,
    pub buy_exchange: Option<String>,
    pub sell_exchange: Option<String>,
    pub status_in: Vec<SpreadStatus>,
}
