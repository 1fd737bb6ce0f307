//! Tick structures broadcast by the price/news source.
//!
//! Both ticks are `Copy` and derive `rkyv::Archive` so they travel over the
//! broadcast sockets as validated zero-copy archives.
//!
//! # Timestamp convention
//!
//! `timestamp_us` is microseconds since Unix epoch, stamped by the producer
//! when the tick is generated.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

use super::symbol::{SYMBOL_LEN, symbol_from_bytes, symbol_to_bytes};

/// Latest traded price for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct PriceTick {
    pub symbol: [u8; SYMBOL_LEN],
    pub price: f64,
    pub timestamp_us: u64,
}

impl PriceTick {
    /// Build a tick, or `None` if `symbol` does not fit the fixed buffer.
    pub fn new(symbol: &str, price: f64, timestamp_us: u64) -> Option<Self> {
        Some(Self { symbol: symbol_to_bytes(symbol)?, price, timestamp_us })
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        symbol_from_bytes(&self.symbol)
    }
}

/// Market-wide news sentiment; `score` lies in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct SentimentTick {
    pub score: f64,
    pub timestamp_us: u64,
}

impl SentimentTick {
    /// Build a tick, clamping `score` into `[-1, 1]`.
    pub fn new(score: f64, timestamp_us: u64) -> Self {
        Self { score: score.clamp(-1.0, 1.0), timestamp_us }
    }
}
