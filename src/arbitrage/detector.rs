//! Per-(symbol, buy_ex, sell_ex) spread state machine. Not safe for
//! concurrent use — exactly one thread of control (the ArbitrageBot main
//! loop) is expected to call `detect`.

use std::collections::HashMap;

use chrono::Utc;

use crate::config::ArbitrageBotConfig;
use crate::model::{PricePoint, SpreadEvent, SpreadStatus};

/// Chatter guard: an Updated event only fires once the spread has grown at
/// least this many percentage points past the last recorded max.
const MIN_STEP_CHANGE_TO_UPDATE: f64 = 0.5;

#[derive(Debug, Clone)]
struct ActiveSpreadState {
    max_spread_percent: f64,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct SpreadKey {
    symbol: String,
    buy_exchange: String,
    sell_exchange: String,
}

pub struct SpreadDetector {
    min_spread_percent: f64,
    max_age_ms: i64,
    percent_for_close_spread: f64,
    active_spreads: HashMap<SpreadKey, ActiveSpreadState>,
    now_fn: Box<dyn Fn() -> i64 + Send>,
}

impl SpreadDetector {
    pub fn new(cfg: &ArbitrageBotConfig) -> Self {
        Self {
            min_spread_percent: cfg.min_spread_percent,
            max_age_ms: cfg.max_age_ms,
            percent_for_close_spread: cfg.percent_for_close_spread,
            active_spreads: HashMap::new(),
            now_fn: Box::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Number of currently open (symbol, buy_ex, sell_ex) spreads. Bounded by
    /// |symbols| * |exchanges| * (|exchanges| - 1).
    pub fn active_spread_count(&self) -> usize {
        self.active_spreads.len()
    }

    pub fn detect(
        &mut self,
        symbol: &str,
        prices_by_exchange: &HashMap<String, PricePoint>,
    ) -> Vec<SpreadEvent> {
        let now_ms = (self.now_fn)();

        let fresh = filter_freshest_prices(prices_by_exchange, now_ms, self.max_age_ms);
        if fresh.len() < 2 {
            return Vec::new();
        }

        let mut events = Vec::new();

        for (buy_exchange, buy_price) in &fresh {
            for (sell_exchange, sell_price) in &fresh {
                if buy_exchange == sell_exchange {
                    continue;
                }
                if sell_price.price <= buy_price.price {
                    continue;
                }

                let spread_percent = (sell_price.price - buy_price.price) / buy_price.price * 100.0;

                let key = SpreadKey {
                    symbol: symbol.to_string(),
                    buy_exchange: buy_exchange.clone(),
                    sell_exchange: sell_exchange.clone(),
                };

                match self.active_spreads.get(&key) {
                    None if spread_percent < self.min_spread_percent => continue,
                    None => {
                        self.active_spreads.insert(
                            key,
                            ActiveSpreadState {
                                max_spread_percent: spread_percent,
                            },
                        );
                        events.push(SpreadEvent {
                            status: SpreadStatus::Opened,
                            symbol: symbol.to_string(),
                            buy_exchange: buy_exchange.clone(),
                            sell_exchange: sell_exchange.clone(),
                            buy_price: buy_price.price,
                            sell_price: sell_price.price,
                            from_spread_percent: spread_percent,
                            max_spread_percent: spread_percent,
                        });
                    }
                    Some(state)
                        if spread_percent > state.max_spread_percent + MIN_STEP_CHANGE_TO_UPDATE =>
                    {
                        self.active_spreads.get_mut(&key).unwrap().max_spread_percent =
                            spread_percent;
                        events.push(SpreadEvent {
                            status: SpreadStatus::Updated,
                            symbol: symbol.to_string(),
                            buy_exchange: buy_exchange.clone(),
                            sell_exchange: sell_exchange.clone(),
                            buy_price: 0.0,
                            sell_price: 0.0,
                            from_spread_percent: 0.0,
                            max_spread_percent: spread_percent,
                        });
                    }
                    Some(_) if spread_percent <= self.percent_for_close_spread => {
                        self.active_spreads.remove(&key);
                        events.push(SpreadEvent {
                            status: SpreadStatus::Closed,
                            symbol: symbol.to_string(),
                            buy_exchange: buy_exchange.clone(),
                            sell_exchange: sell_exchange.clone(),
                            buy_price: 0.0,
                            sell_price: 0.0,
                            from_spread_percent: 0.0,
                            max_spread_percent: 0.0,
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        events
    }

    #[cfg(test)]
    fn set_now_fn(&mut self, f: impl Fn() -> i64 + Send + 'static) {
        self.now_fn = Box::new(f);
    }
}

fn filter_freshest_prices(
    prices_by_exchange: &HashMap<String, PricePoint>,
    now_ms: i64,
    max_age_ms: i64,
) -> HashMap<String, PricePoint> {
    prices_by_exchange
        .iter()
        .filter(|(_, p)| p.price > 0.0 && now_ms - p.ts_ms <= max_age_ms)
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ArbitrageBotConfig {
        ArbitrageBotConfig {
            max_age_ms: 60_000,
            min_spread_percent: 1.0,
            percent_for_close_spread: 0.1,
        }
    }

    fn prices(pairs: &[(&str, f64, i64)]) -> HashMap<String, PricePoint> {
        pairs
            .iter()
            .map(|(ex, price, ts)| (ex.to_string(), PricePoint { price: *price, ts_ms: *ts }))
            .collect()
    }

    #[test]
    fn scenario_open_update_close() {
        let mut sd = SpreadDetector::new(&cfg());
        let t = 1_000_000_i64;
        sd.set_now_fn(move || t);

        let events = sd.detect("BTCUSDT", &prices(&[("ByBit", 100.0, t), ("BingX", 103.0, t)]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, SpreadStatus::Opened);
        assert_eq!(events[0].buy_exchange, "ByBit");
        assert_eq!(events[0].sell_exchange, "BingX");
        assert!((events[0].max_spread_percent - 3.0).abs() < 1e-9);

        let events = sd.detect("BTCUSDT", &prices(&[("ByBit", 100.0, t), ("BingX", 105.0, t)]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, SpreadStatus::Updated);
        assert!((events[0].max_spread_percent - 5.0).abs() < 1e-9);

        let events = sd.detect("BTCUSDT", &prices(&[("ByBit", 100.0, t), ("BingX", 100.001, t)]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, SpreadStatus::Closed);
        assert_eq!(sd.active_spread_count(), 0);
    }

    #[test]
    fn scenario_stale_price_yields_nothing() {
        let mut sd = SpreadDetector::new(&cfg());
        let t = 1_000_000_i64;
        sd.set_now_fn(move || t);

        let events = sd.detect("BTCUSDT", &prices(&[("ByBit", 100.0, t), ("BingX", 103.0, t - 61_000)]));
        assert!(events.is_empty());
    }

    #[test]
    fn scenario_below_min_spread_yields_nothing() {
        let mut sd = SpreadDetector::new(&cfg());
        let t = 1_000_000_i64;
        sd.set_now_fn(move || t);

        let events = sd.detect("BTCUSDT", &prices(&[("ByBit", 100.0, t), ("BingX", 100.5, t)]));
        assert!(events.is_empty());
    }

    #[test]
    fn no_second_open_without_intervening_close() {
        let mut sd = SpreadDetector::new(&cfg());
        let t = 1_000_000_i64;
        sd.set_now_fn(move || t);

        let first = sd.detect("BTCUSDT", &prices(&[("ByBit", 100.0, t), ("BingX", 103.0, t)]));
        assert_eq!(first[0].status, SpreadStatus::Opened);

        // Same spread again: neither a second Open, an Update (not enough
        // step change), nor a Close.
        let second = sd.detect("BTCUSDT", &prices(&[("ByBit", 100.0, t), ("BingX", 103.0, t)]));
        assert!(second.is_empty());
    }

    #[test]
    fn negative_spread_pair_is_skipped() {
        let mut sd = SpreadDetector::new(&cfg());
        let t = 1_000_000_i64;
        sd.set_now_fn(move || t);

        let events = sd.detect("BTCUSDT", &prices(&[("ByBit", 103.0, t), ("BingX", 100.0, t)]));
        // ByBit is cheaper than BingX here too (when read as buy=BingX,
        // sell=ByBit it's negative); the only positive-direction pair is
        // buy=BingX sell=ByBit which has spread ~3%, so this should open.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].buy_exchange, "BingX");
        assert_eq!(events[0].sell_exchange, "ByBit");
    }
}
