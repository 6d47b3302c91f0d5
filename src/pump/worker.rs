//! One shard of the pump engine: owns a slice of symbols (assigned by
//! `crate::hash::shard_for`) and their `Window`s, with no locking needed
//! since a symbol is always routed to the same worker.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::config::PumpBotConfig;
use crate::model::Trade;
use crate::pump::PumpSignal;
use crate::pump::window::Window;

pub struct Worker {
    id: usize,
    windows: HashMap<String, Window>,
    check_interval_secs: i64,
    pump_interval_secs: i64,
    window_secs: usize,
    target_price_change: f64,
    alert_step: f64,
    trades_processed: u64,
}

impl Worker {
    pub fn new(id: usize, cfg: &PumpBotConfig) -> Self {
        Self {
            id,
            windows: HashMap::new(),
            check_interval_secs: cfg.check_interval.as_secs() as i64,
            pump_interval_secs: cfg.pump_interval,
            window_secs: cfg.pump_interval.max(0) as usize,
            target_price_change: cfg.target_price_change,
            alert_step: cfg.alert_step,
            trades_processed: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn trades_processed(&self) -> u64 {
        self.trades_processed
    }

    /// Feeds one trade into its symbol's window and returns a signal if the
    /// hysteresis logic decides this is a new or escalated pump.
    pub fn process_trade(&mut self, trade: &Trade) -> Option<PumpSignal> {
        self.trades_processed += 1;
        let ts_secs = trade.ts_ms / 1000;

        let window = self
            .windows
            .entry(trade.symbol.clone())
            .or_insert_with(|| Window::new(self.window_secs));
        window.add_trade(ts_secs, trade.price);

        if !window.can_check(ts_secs, self.check_interval_secs) {
            return None;
        }

        let (change, exceeded) = window.check_grow(self.window_secs, self.target_price_change);
        if !exceeded {
            return None;
        }

        let (last_alert_time, last_alert_level) = window.alert_state();
        let is_new_pump = ts_secs - last_alert_time > self.pump_interval_secs;
        let is_step_up = change >= last_alert_level + self.alert_step;

        if !is_new_pump && !is_step_up {
            return None;
        }

        window.update_alert_state(ts_secs, change);

        Some(PumpSignal {
            symbol: trade.symbol.clone(),
            price_change_percent: change,
            window_secs: self.window_secs,
            ts_ms: trade.ts_ms,
        })
    }

    /// Drains `inbound` until the channel closes, forwarding signals to
    /// `out`. Exits silently if `out` is closed (no one left to notify).
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Trade>, out: mpsc::Sender<PumpSignal>) {
        while let Some(trade) = inbound.recv().await {
            if let Some(signal) = self.process_trade(&trade) {
                if out.send(signal).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Side;
    use std::time::Duration;

    fn cfg() -> PumpBotConfig {
        PumpBotConfig {
            check_interval: Duration::from_secs(1),
            startup_delay: Duration::from_secs(0),
            filter_tickers_turnover: 0.0,
            pump_interval: 60,
            target_price_change: 5.0,
            alert_step: 5.0,
            rps_timer_interval: 60,
        }
    }

    fn trade(ts_ms: i64, price: f64) -> Trade {
        Trade {
            symbol: "BTCUSDT".into(),
            ts_ms,
            price,
            volume: 1.0,
            side: Side::Buy,
        }
    }

    #[test]
    fn no_signal_below_target_change() {
        let mut w = Worker::new(0, &cfg());
        let mut sig = None;
        for i in 0..70 {
            sig = w.process_trade(&trade(i * 1000, 100.0));
        }
        assert!(sig.is_none());
    }

    #[test]
    fn emits_new_pump_after_sufficient_growth() {
        let mut w = Worker::new(0, &cfg());
        for i in 0..61 {
            w.process_trade(&trade(i * 1000, 100.0));
        }
        let signal = w.process_trade(&trade(61_000, 110.0));
        assert!(signal.is_some());
        let signal = signal.unwrap();
        assert_eq!(signal.symbol, "BTCUSDT");
        assert!((signal.price_change_percent - 10.0).abs() < 1.0);
    }

    #[test]
    fn hysteresis_suppresses_repeat_alert_below_step() {
        let mut w = Worker::new(0, &cfg());
        for i in 0..61 {
            w.process_trade(&trade(i * 1000, 100.0));
        }
        let first = w.process_trade(&trade(61_000, 110.0));
        assert!(first.is_some());

        // A second check one interval later with the same magnitude of
        // change should not re-fire: it's neither past pump_interval nor a
        // step-up past last_alert_level + alert_step.
        let second = w.process_trade(&trade(62_000, 110.2));
        assert!(second.is_none());
    }

    #[test]
    fn step_up_past_alert_step_fires_again() {
        let mut w = Worker::new(0, &cfg());
        for i in 0..61 {
            w.process_trade(&trade(i * 1000, 100.0));
        }
        let first = w.process_trade(&trade(61_000, 110.0));
        assert!(first.is_some());

        let second = w.process_trade(&trade(62_000, 120.0));
        assert!(second.is_some());
    }
}
