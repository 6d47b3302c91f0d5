//! Fixed-size ring buffer of one-second price samples, used to measure
//! short-horizon price change for pump detection. Gaps (seconds with no
//! trade) are filled with the last known price so `check_grow` always
//! compares against a full window.

/// Slack beyond the configured window length so a check at exactly
/// `window_size` seconds back still has a sample to compare against.
const WINDOW_PADDING: usize = 50;

#[derive(Debug, Clone, Copy, Default)]
struct AlertState {
    last_alert_time: i64,
    last_alert_level: f64,
}

/// One symbol's second-resolution price ring buffer plus its pump-alert
/// hysteresis state. Not safe for concurrent use; owned by exactly one
/// `Worker`.
pub struct Window {
    window_size: usize,
    prices: Vec<f64>,
    timestamps: Vec<i64>,
    last_check: i64,
    last_price: f64,
    last_ts: i64,
    alert: AlertState,
}

impl Window {
    pub fn new(window_size: usize) -> Self {
        let capacity = window_size + WINDOW_PADDING;
        Self {
            window_size,
            prices: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
            last_check: 0,
            last_price: 0.0,
            last_ts: 0,
            alert: AlertState::default(),
        }
    }

    /// Appends a new second-resolution sample at `ts_secs`, filling any gap
    /// since the last sample with the last known price.
    pub fn add_trade(&mut self, ts_secs: i64, price: f64) {
        if self.prices.is_empty() {
            self.prices.push(price);
            self.timestamps.push(ts_secs);
            self.last_price = price;
            self.last_ts = ts_secs;
            return;
        }

        if ts_secs <= self.last_ts {
            // Out-of-order or same-second trade: update the most recent
            // sample in place, don't grow the buffer.
            if let Some(last) = self.prices.last_mut() {
                *last = price;
            }
            self.last_price = price;
            return;
        }

        self.fill_gaps(ts_secs);
        self.push_sample(ts_secs, price);
        self.last_price = price;
        self.last_ts = ts_secs;
    }

    fn fill_gaps(&mut self, target_ts: i64) {
        let mut ts = self.last_ts + 1;
        while ts < target_ts {
            self.push_sample(ts, self.last_price);
            ts += 1;
        }
    }

    fn push_sample(&mut self, ts_secs: i64, price: f64) {
        self.prices.push(price);
        self.timestamps.push(ts_secs);
        let cap = self.window_size + WINDOW_PADDING;
        if self.prices.len() > cap {
            let overflow = self.prices.len() - cap;
            self.prices.drain(0..overflow);
            self.timestamps.drain(0..overflow);
        }
    }

    /// Upward percent change between the current price and the price
    /// `interval_secs` ago, and whether it meets `target_percent`. A pump is
    /// an upward move only, so a flat or falling price returns `(0.0, false)`
    /// just like an under-filled window.
    pub fn check_grow(&self, interval_secs: usize, target_percent: f64) -> (f64, bool) {
        if self.prices.len() <= interval_secs {
            return (0.0, false);
        }

        let current = *self.prices.last().unwrap();
        let past_index = self.prices.len() - 1 - interval_secs;
        let past = self.prices[past_index];
        if past == 0.0 {
            return (0.0, false);
        }

        let change = (current - past) / past * 100.0;
        if change >= target_percent {
            (change, true)
        } else {
            (0.0, false)
        }
    }

    /// Monotonic throttle: true at most once per `min_interval_secs`.
    pub fn can_check(&mut self, now_secs: i64, min_interval_secs: i64) -> bool {
        if now_secs - self.last_check < min_interval_secs {
            return false;
        }
        self.last_check = now_secs;
        true
    }

    pub fn alert_state(&self) -> (i64, f64) {
        (self.alert.last_alert_time, self.alert.last_alert_level)
    }

    pub fn update_alert_state(&mut self, now_secs: i64, level: f64) {
        self.alert.last_alert_time = now_secs;
        self.alert.last_alert_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_trade_seeds_single_sample() {
        let mut w = Window::new(60);
        w.add_trade(1000, 10.0);
        assert_eq!(w.prices, vec![10.0]);
    }

    #[test]
    fn gap_filling_repeats_last_price() {
        let mut w = Window::new(60);
        w.add_trade(1000, 10.0);
        w.add_trade(1005, 12.0);
        assert_eq!(w.prices, vec![10.0, 10.0, 10.0, 10.0, 10.0, 12.0]);
        assert_eq!(w.timestamps, vec![1000, 1001, 1002, 1003, 1004, 1005]);
    }

    #[test]
    fn check_grow_reports_percent_change() {
        let mut w = Window::new(10);
        w.add_trade(1000, 100.0);
        for i in 1..=10 {
            w.add_trade(1000 + i, 100.0);
        }
        w.add_trade(1011, 110.0);

        let (change, exceeded) = w.check_grow(10, 5.0);
        assert!((change - 10.0).abs() < 1e-9);
        assert!(exceeded);

        let (change, not_exceeded) = w.check_grow(10, 50.0);
        assert!(!not_exceeded);
        assert_eq!(change, 0.0);
    }

    #[test]
    fn check_grow_ignores_downward_moves() {
        let mut w = Window::new(10);
        w.add_trade(1000, 100.0);
        for i in 1..=10 {
            w.add_trade(1000 + i, 100.0);
        }
        w.add_trade(1011, 85.0);

        let (change, exceeded) = w.check_grow(10, 5.0);
        assert_eq!(change, 0.0);
        assert!(!exceeded);
    }

    #[test]
    fn check_grow_false_before_window_is_full() {
        let w = Window::new(60);
        let (change, exceeded) = w.check_grow(10, 1.0);
        assert_eq!(change, 0.0);
        assert!(!exceeded);
    }

    #[test]
    fn can_check_throttles_to_interval() {
        let mut w = Window::new(60);
        assert!(w.can_check(1000, 5));
        assert!(!w.can_check(1002, 5));
        assert!(w.can_check(1005, 5));
    }

    #[test]
    fn alert_state_round_trips() {
        let mut w = Window::new(60);
        assert_eq!(w.alert_state(), (0, 0.0));
        w.update_alert_state(1000, 7.5);
        assert_eq!(w.alert_state(), (1000, 7.5));
    }

    #[test]
    fn ring_buffer_caps_at_window_plus_padding() {
        let mut w = Window::new(10);
        for i in 0..200 {
            w.add_trade(1000 + i, i as f64);
        }
        assert!(w.prices.len() <= 10 + WINDOW_PADDING);
    }
}
