//! Fans trades in from every configured `Provider`, maintains the `Prices`
//! map, and drives the `SpreadDetector`. Single-owner: one task maintains
//! `Prices`, so the detector never has to reason about concurrent writers.

pub mod detector;
pub mod notifier;
pub mod repository;
pub mod signal_handler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, watch};

use crate::config::ArbitrageBotConfig;
use crate::model::{Category, PricePoint, Prices};
use crate::provider::Provider;
use detector::SpreadDetector;

/// A trade tagged with which exchange produced it, used only on the
/// fan-in path before it's folded into `Prices`.
struct PriceUpdate {
    exchange: &'static str,
    symbol: String,
    price: f64,
    ts_ms: i64,
}

pub struct ArbitrageBot {
    providers: Vec<Arc<dyn Provider>>,
    config: ArbitrageBotConfig,
    signal_tx: mpsc::Sender<crate::model::SpreadEvent>,
}

impl ArbitrageBot {
    /// `providers` must name at least two distinct exchanges; `signal_tx`
    /// feeds a `SignalHandler` running in its own task.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        config: ArbitrageBotConfig,
        signal_tx: mpsc::Sender<crate::model::SpreadEvent>,
    ) -> Result<Self> {
        if providers.len() < 2 {
            return Err(anyhow!("arbitrage bot needs at least two providers"));
        }
        let mut names = HashSet::new();
        for p in &providers {
            if !names.insert(p.exchange_name()) {
                return Err(anyhow!("duplicate provider exchange name: {}", p.exchange_name()));
            }
        }
        Ok(Self {
            providers,
            config,
            signal_tx,
        })
    }

    /// Symbols tradable on every configured exchange.
    async fn shared_symbols(&self) -> Result<Vec<String>> {
        let mut sets = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let tickers = provider.list_tickers(Category::Linear).await?;
            sets.push(
                tickers
                    .into_iter()
                    .map(|t| t.symbol)
                    .collect::<HashSet<_>>(),
            );
        }

        let mut iter = sets.into_iter();
        let mut intersection = iter.next().unwrap_or_default();
        for set in iter {
            intersection.retain(|s| set.contains(s));
        }
        Ok(intersection.into_iter().collect())
    }

    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<()> {
        let symbols = self.shared_symbols().await?;
        tracing::info!(symbols = symbols.len(), "arbitrage bot watching shared symbols");

        let (update_tx, mut update_rx) = mpsc::channel::<PriceUpdate>(2000);

        for provider in &self.providers {
            let exchange = provider.exchange_name();
            let mut trades = provider.subscribe_trades(symbols.clone(), cancel.clone()).await?;
            let update_tx = update_tx.clone();
            tokio::spawn(async move {
                while let Some(trade) = trades.recv().await {
                    let update = PriceUpdate {
                        exchange,
                        symbol: trade.symbol,
                        price: trade.price,
                        ts_ms: trade.ts_ms,
                    };
                    if update_tx.send(update).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(update_tx);

        let mut prices: Prices = HashMap::new();
        let mut detector = SpreadDetector::new(&self.config);
        let mut cancel = cancel;

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
                update = update_rx.recv() => {
                    let Some(update) = update else { break };

                    let by_exchange = prices.entry(update.symbol.clone()).or_default();
                    by_exchange.insert(
                        update.exchange.to_string(),
                        PricePoint { price: update.price, ts_ms: update.ts_ms },
                    );

                    let events = detector.detect(&update.symbol, by_exchange);
                    for event in events {
                        if self.signal_tx.send(event).await.is_err() {
                            tracing::warn!("signal handler channel closed, dropping spread event");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ticker, Trade};
    use async_trait::async_trait;

    struct FakeProvider {
        name: &'static str,
        tickers: Vec<Ticker>,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn exchange_name(&self) -> &'static str {
            self.name
        }

        async fn list_tickers(&self, _category: Category) -> Result<Vec<Ticker>> {
            Ok(self.tickers.clone())
        }

        async fn subscribe_trades(
            &self,
            _symbols: Vec<String>,
            _cancel: watch::Receiver<bool>,
        ) -> Result<mpsc::Receiver<Trade>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn ticker(symbol: &str) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 1.0,
            turnover_24h: 1.0,
        }
    }

    fn cfg() -> ArbitrageBotConfig {
        ArbitrageBotConfig {
            max_age_ms: 1,
            min_spread_percent: 1.0,
            percent_for_close_spread: 0.1,
        }
    }

    #[test]
    fn rejects_fewer_than_two_providers() {
        let (tx, _rx) = mpsc::channel(1);
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(FakeProvider {
            name: "ByBit",
            tickers: vec![],
        })];
        let result = ArbitrageBot::new(providers, cfg(), tx);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_duplicate_exchange_names() {
        let (tx, _rx) = mpsc::channel(1);
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FakeProvider { name: "ByBit", tickers: vec![] }),
            Arc::new(FakeProvider { name: "ByBit", tickers: vec![] }),
        ];
        let result = ArbitrageBot::new(providers, cfg(), tx);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shared_symbols_intersects_ticker_lists() {
        let (tx, _rx) = mpsc::channel(1);
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FakeProvider {
                name: "ByBit",
                tickers: vec![ticker("BTCUSDT"), ticker("ETHUSDT")],
            }),
            Arc::new(FakeProvider {
                name: "BingX",
                tickers: vec![ticker("BTCUSDT"), ticker("SOLUSDT")],
            }),
        ];
        let bot = ArbitrageBot::new(providers, cfg(), tx).unwrap();

        let mut shared = bot.shared_symbols().await.unwrap();
        shared.sort();
        assert_eq!(shared, vec!["BTCUSDT".to_string()]);
    }
}
