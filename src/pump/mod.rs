//! Sharded pump detector: filters the tradable-symbol universe down to
//! liquid USDT perpetuals, then fans trades out to a fixed pool of
//! `Worker`s by `hash::shard_for(symbol)` so each symbol's `Window` is only
//! ever touched by one task.

pub mod window;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};

use crate::config::PumpBotConfig;
use crate::hash::shard_for;
use crate::model::{Category, Trade};
use crate::provider::Provider;
use worker::Worker;

/// A detected price move, ready for whatever consumes pump alerts
/// (currently just logged; SPEC_FULL Non-goals exclude a dedicated pump
/// notification sink).
#[derive(Debug, Clone)]
pub struct PumpSignal {
    pub symbol: String,
    pub price_change_percent: f64,
    pub window_secs: usize,
    pub ts_ms: i64,
}

/// USDT-margined symbols only; above `max_turnover` a symbol is a large-cap
/// outside the small/mid-cap universe this engine targets.
fn filter_tickers(tickers: &[crate::model::Ticker], max_turnover: f64) -> Vec<String> {
    tickers
        .iter()
        .filter(|t| t.symbol.ends_with("USDT") && t.turnover_24h <= max_turnover)
        .map(|t| t.symbol.clone())
        .collect()
}

pub struct PumpBot {
    provider: Arc<dyn Provider>,
    config: PumpBotConfig,
    num_workers: usize,
}

impl PumpBot {
    pub fn new(provider: Arc<dyn Provider>, config: PumpBotConfig, num_workers: usize) -> Self {
        Self {
            provider,
            config,
            num_workers: num_workers.max(1),
        }
    }

    /// Runs until `cancel` is signalled: lists tickers, filters to the
    /// watchable universe, subscribes to their trade stream, and dispatches
    /// each trade to its shard's worker.
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<()> {
        tokio::time::sleep(self.config.startup_delay).await;

        let tickers = self.provider.list_tickers(Category::Linear).await?;
        let symbols = filter_tickers(&tickers, self.config.filter_tickers_turnover);
        tracing::info!(
            exchange = self.provider.exchange_name(),
            symbols = symbols.len(),
            "pump engine watching symbols"
        );

        let mut trades = self
            .provider
            .subscribe_trades(symbols, cancel.clone())
            .await?;

        let (signal_tx, signal_rx) = mpsc::channel::<PumpSignal>(1024);

        let mut worker_txs = Vec::with_capacity(self.num_workers);
        for id in 0..self.num_workers {
            let (tx, rx) = mpsc::channel::<Trade>(2048);
            let worker = Worker::new(id, &self.config);
            tokio::spawn(worker.run(rx, signal_tx.clone()));
            worker_txs.push(tx);
        }
        drop(signal_tx);

        tokio::spawn(log_signals(signal_rx));

        let mut rps_ticker = tokio::time::interval(Duration::from_secs(
            self.config.rps_timer_interval.max(1) as u64,
        ));
        let mut trades_seen: u64 = 0;
        let mut cancel = cancel;

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
                trade = trades.recv() => {
                    let Some(trade) = trade else { break };
                    trades_seen += 1;
                    let shard = shard_for(&trade.symbol, worker_txs.len());
                    if worker_txs[shard].try_send(trade).is_err() {
                        tracing::warn!("pump worker {shard} inbound channel full, dropping trade");
                    }
                }
                _ = rps_ticker.tick() => {
                    tracing::debug!(trades_seen, "pump engine throughput");
                    trades_seen = 0;
                }
            }
        }

        Ok(())
    }
}

async fn log_signals(mut rx: mpsc::Receiver<PumpSignal>) {
    while let Some(signal) = rx.recv().await {
        tracing::info!(
            symbol = %signal.symbol,
            change_percent = signal.price_change_percent,
            window_secs = signal.window_secs,
            "pump detected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ticker;

    #[test]
    fn filters_to_usdt_symbols_below_turnover() {
        let tickers = vec![
            Ticker { symbol: "BTCUSDT".into(), last_price: 1.0, turnover_24h: 1_000_000.0 },
            Ticker { symbol: "ETHUSDT".into(), last_price: 1.0, turnover_24h: 10.0 },
            Ticker { symbol: "SOLUSD".into(), last_price: 1.0, turnover_24h: 10.0 },
        ];
        let symbols = filter_tickers(&tickers, 800_000.0);
        assert_eq!(symbols, vec!["ETHUSDT".to_string()]);
    }
}
