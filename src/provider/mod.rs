//! Per-exchange abstraction. `Provider` is the sole abstraction over
//! exchange wire formats so the arbitrage/pump engines stay wire-agnostic.

pub mod bingx;
pub mod bybit;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::model::{Category, Ticker, Trade};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used as a key in the `Prices` map.
    fn exchange_name(&self) -> &'static str;

    /// Synchronous ticker snapshot, fails with `CoreError::Network`,
    /// `RemoteError`, or `Decode`.
    async fn list_tickers(&self, category: Category) -> Result<Vec<Ticker>>;

    /// Starts streaming trades for `symbols`; the returned channel closes
    /// when `cancel` is signalled.
    async fn subscribe_trades(
        &self,
        symbols: Vec<String>,
        cancel: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Trade>>;
}

/// Canonical symbol form used everywhere outside a specific provider's wire
/// format: `BASEUSDT`, no separator.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.replace('-', "").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dashed_symbol() {
        assert_eq!(normalize_symbol("BTC-USDT"), "BTCUSDT");
    }

    #[test]
    fn passes_through_canonical_symbol() {
        assert_eq!(normalize_symbol("BTCUSDT"), "BTCUSDT");
    }
}
