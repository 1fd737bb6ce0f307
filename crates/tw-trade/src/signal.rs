//! Price trend signal and the sentiment agreement rule.
//!
//! Each symbol keeps a rolling window of its last `N` observed prices. A new
//! observation is compared to the mean of the window *before* it is pushed:
//!
//! | price vs mean | signal  |
//! |---------------|---------|
//! | above         | Bullish |
//! | below         | Bearish |
//! | equal         | Neutral |
//!
//! Until a symbol's window holds `min_history` readings it stays Neutral.

use std::collections::VecDeque;

use ahash::AHashMap;
use tw_core::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSignal {
    Bullish,
    Bearish,
    Neutral,
}

/// Fixed-capacity FIFO of recent prices.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, values: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of observing one price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub signal: PriceSignal,
    /// Window mean the price was compared against.
    pub mean: Option<f64>,
}

/// Per-symbol rolling windows, created on first observation.
#[derive(Debug)]
pub struct SignalBook {
    window: usize,
    min_history: usize,
    windows: AHashMap<String, RollingWindow>,
}

impl SignalBook {
    /// `min_history` is clamped to `1..=window`.
    pub fn new(window: usize, min_history: usize) -> Self {
        let window = window.max(1);
        Self { window, min_history: min_history.clamp(1, window), windows: AHashMap::new() }
    }

    /// Classify `price` against the window, then push it.
    pub fn observe(&mut self, symbol: &str, price: f64) -> Observation {
        let window = self.windows.entry(symbol.to_string()).or_insert_with(|| RollingWindow::new(self.window));
        let mean = window.mean();
        let warm = window.len() >= self.min_history;
        let signal = match mean {
            Some(m) if warm && price > m => PriceSignal::Bullish,
            Some(m) if warm && price < m => PriceSignal::Bearish,
            _ => PriceSignal::Neutral,
        };
        window.push(price);
        Observation { signal, mean }
    }

    pub fn window(&self, symbol: &str) -> Option<&RollingWindow> {
        self.windows.get(symbol)
    }
}

/// Sentiment cut-offs for the agreement rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub buy: f64,
    pub sell: f64,
}

/// Buy when trend and sentiment are both bullish, sell when both are bearish.
pub fn decide(signal: PriceSignal, score: f64, thresholds: Thresholds) -> Option<Side> {
    match signal {
        PriceSignal::Bullish if score > thresholds.buy => Some(Side::Buy),
        PriceSignal::Bearish if score < thresholds.sell => Some(Side::Sell),
        _ => None,
    }
}
