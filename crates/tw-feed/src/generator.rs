//! Synthetic tick generators.
//!
//! Prices follow an independent bounded random walk per symbol: each step
//! adds a uniform delta in `[-step, +step]` and clamps at [`PRICE_FLOOR`].
//! Sentiment is an independent uniform draw in `[-1, 1]` per tick.

use std::collections::HashMap;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tw_core::config::MAX_PRICE_STEP;
use tw_core::types::symbol::{symbol_to_bytes, SYMBOL_LEN};
use tw_core::{PipelineError, PriceTick, SentimentTick};

/// Prices never walk below this.
pub const PRICE_FLOOR: f64 = 0.01;

/// Range for symbols without a configured starting price.
const DEFAULT_START: std::ops::Range<f64> = 100.0..300.0;

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Random-walk price generator over a fixed symbol list.
pub struct RandomWalk {
    symbols: Vec<[u8; SYMBOL_LEN]>,
    prices: Vec<f64>,
    step: f64,
    rng: StdRng,
}

impl RandomWalk {
    pub fn new(
        symbols: &[String],
        initial: &HashMap<String, f64>,
        step: f64,
        seed: Option<u64>,
    ) -> Result<Self, PipelineError> {
        if !step.is_finite() || step.abs() >= MAX_PRICE_STEP {
            return Err(PipelineError::Config(format!("price step {step} is out of range")));
        }
        let mut rng = make_rng(seed);
        let mut encoded = Vec::with_capacity(symbols.len());
        let mut prices = Vec::with_capacity(symbols.len());
        for sym in symbols {
            let bytes = symbol_to_bytes(sym)
                .ok_or_else(|| PipelineError::Config(format!("symbol '{sym}' does not fit a tick")))?;
            encoded.push(bytes);
            let start = match initial.get(sym) {
                Some(p) => *p,
                None => rng.gen_range(DEFAULT_START),
            };
            prices.push(start.max(PRICE_FLOOR));
        }
        Ok(Self { symbols: encoded, prices, step: step.abs(), rng })
    }

    /// Advance every symbol one step; all ticks share `timestamp_us`.
    pub fn advance(&mut self, timestamp_us: u64) -> Vec<PriceTick> {
        let mut ticks = Vec::with_capacity(self.prices.len());
        for (symbol, price) in self.symbols.iter().zip(self.prices.iter_mut()) {
            let delta = self.rng.gen_range(-self.step..=self.step);
            *price = (*price + delta).max(PRICE_FLOOR);
            ticks.push(PriceTick { symbol: *symbol, price: *price, timestamp_us });
        }
        ticks
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }
}

/// Uniform sentiment generator.
pub struct SentimentGen {
    rng: StdRng,
}

impl SentimentGen {
    pub fn new(seed: Option<u64>) -> Self {
        Self { rng: make_rng(seed) }
    }

    pub fn next(&mut self, timestamp_us: u64) -> SentimentTick {
        SentimentTick::new(self.rng.gen_range(-1.0..=1.0), timestamp_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn walk_stays_in_step_and_above_floor() {
        let mut initial = HashMap::new();
        initial.insert("PENNY".to_string(), 0.2);
        initial.insert("AAPL".to_string(), 150.0);
        let mut walk = RandomWalk::new(&syms(&["PENNY", "AAPL"]), &initial, 0.5, Some(7)).unwrap();

        let mut prev = walk.prices().to_vec();
        for ts in 1..=2_000 {
            let ticks = walk.advance(ts);
            assert_eq!(ticks.len(), 2);
            for (tick, before) in ticks.iter().zip(prev.iter()) {
                assert_eq!(tick.timestamp_us, ts);
                assert!(tick.price >= PRICE_FLOOR);
                assert!((tick.price - before).abs() <= 0.5 + 1e-9);
            }
            prev = walk.prices().to_vec();
        }
        assert_eq!(walk.advance(1)[0].symbol(), "PENNY");
    }

    #[test]
    fn unconfigured_symbols_start_in_default_range() {
        let walk = RandomWalk::new(&syms(&["A", "B", "C"]), &HashMap::new(), 0.5, Some(1)).unwrap();
        assert!(walk.prices().iter().all(|p| DEFAULT_START.contains(p)));
    }

    #[test]
    fn same_seed_same_walk() {
        let s = syms(&["AAPL", "MSFT"]);
        let mut a = RandomWalk::new(&s, &HashMap::new(), 0.5, Some(42)).unwrap();
        let mut b = RandomWalk::new(&s, &HashMap::new(), 0.5, Some(42)).unwrap();
        for ts in 0..50 {
            assert_eq!(a.advance(ts), b.advance(ts));
        }
    }

    #[test]
    fn overlong_symbol_is_rejected() {
        let err = RandomWalk::new(&syms(&["WAYTOOLONGSYM"]), &HashMap::new(), 0.5, None).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn unsampleable_step_is_rejected() {
        for step in [1e308, f64::INFINITY, f64::NAN] {
            let err = RandomWalk::new(&syms(&["AAPL"]), &HashMap::new(), step, Some(1)).err().unwrap();
            assert!(matches!(err, PipelineError::Config(_)));
        }
        let mut walk = RandomWalk::new(&syms(&["AAPL"]), &HashMap::new(), 1e300, Some(1)).unwrap();
        assert_eq!(walk.advance(1).len(), 1);
    }

    #[test]
    fn sentiment_in_range() {
        let mut sentiment = SentimentGen::new(Some(3));
        for ts in 0..1_000 {
            let tick = sentiment.next(ts);
            assert!((-1.0..=1.0).contains(&tick.score));
        }
    }
}
