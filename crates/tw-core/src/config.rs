//! Configuration for every pipeline role.
//!
//! All roles read the same JSON file; each takes the section it needs. Every
//! field has a default matching the reference deployment, so an empty object
//! (or no file at all) yields a runnable local pipeline.
//!
//! # Example config
//!
//! ```json
//! {
//!   "symbols": ["AAPL", "MSFT", "GOOGL", "AMZN"],
//!   "logging": { "module_name": "tickwire", "log_path": "/tmp/tickwire" },
//!   "region": { "name": "tickwire_book" },
//!   "source": { "price_addr": "127.0.0.1:9000", "price_interval_ms": 1000 },
//!   "decision": { "window": 5, "buy_threshold": 0.5, "sell_threshold": -0.5 },
//!   "intake": { "log_file": "orders.jsonl" }
//! }
//! ```

use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::PipelineError;
use crate::types::symbol::validate_symbols;

/// Upper bound (exclusive) on `source.price_step`; the walk samples from
/// `[-step, step]`, whose width must stay finite.
pub const MAX_PRICE_STEP: f64 = f64::MAX / 2.0;

fn default_symbols() -> Vec<String> {
    ["AAPL", "MSFT", "GOOGL", "AMZN"].iter().map(|s| s.to_string()).collect()
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)))
}

/// Top-level config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tracked symbols; also fixes the price-book slot order.
    pub symbols: Vec<String>,
    pub logging: LoggingConfig,
    pub region: RegionConfig,
    pub source: SourceConfig,
    pub relay: RelayConfig,
    pub decision: DecisionConfig,
    pub intake: IntakeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            logging: LoggingConfig::default(),
            region: RegionConfig::default(),
            source: SourceConfig::default(),
            relay: RelayConfig::default(),
            decision: DecisionConfig::default(),
            intake: IntakeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_symbols(&self.symbols).map_err(PipelineError::Config)?;

        let d = &self.decision;
        if d.window == 0 {
            return Err(PipelineError::Config("decision.window must be at least 1".into()));
        }
        if let Some(min) = d.min_history.filter(|m| !(1..=d.window).contains(m)) {
            return Err(PipelineError::Config(format!(
                "decision.min_history {min} must be between 1 and decision.window ({})",
                d.window
            )));
        }
        if d.quantity == 0 {
            return Err(PipelineError::Config("decision.quantity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&d.buy_threshold) || !(-1.0..=0.0).contains(&d.sell_threshold) {
            return Err(PipelineError::Config(format!(
                "thresholds out of range: buy {} must be in [0, 1], sell {} in [-1, 0]",
                d.buy_threshold, d.sell_threshold
            )));
        }

        let s = &self.source;
        if s.price_interval_ms == 0 || s.news_interval_ms == 0 {
            return Err(PipelineError::Config("tick intervals must be non-zero".into()));
        }
        if !s.price_step.is_finite() || s.price_step.abs() >= MAX_PRICE_STEP {
            return Err(PipelineError::Config(format!("source.price_step {} is out of range", s.price_step)));
        }
        if s.subscriber_queue == 0 {
            return Err(PipelineError::Config("source.subscriber_queue must be non-zero".into()));
        }
        for sym in s.initial_prices.keys() {
            if !self.symbols.contains(sym) {
                return Err(PipelineError::Config(format!("initial price for untracked symbol '{sym}'")));
            }
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used as the log file prefix.
    pub module_name: String,
    /// Directory for daily-rotating log files; console only when absent.
    pub log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { module_name: "tickwire".to_string(), log_path: None }
    }
}

/// Shared price-book region.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub name: String,
    /// Directory holding the region file (default: `/dev/shm` on Linux).
    pub dir: Option<PathBuf>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self { name: "tickwire_book".to_string(), dir: None }
    }
}

impl RegionConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(crate::book::default_region_dir)
    }
}

/// PriceNewsSource settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub price_addr: SocketAddr,
    pub news_addr: SocketAddr,
    pub price_interval_ms: u64,
    pub news_interval_ms: u64,
    /// Maximum random-walk step per tick. Must be finite and below
    /// [`MAX_PRICE_STEP`].
    pub price_step: f64,
    /// Starting prices; symbols not listed start uniform in [100, 300).
    pub initial_prices: HashMap<String, f64>,
    /// RNG seed for reproducible series.
    pub seed: Option<u64>,
    /// Per-subscriber outbound queue depth, in frames.
    pub subscriber_queue: usize,
    /// A subscriber whose socket write stalls longer than this is dropped.
    pub write_timeout_ms: u64,
    /// Throughput log cadence, in price ticks.
    pub stats_every: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            price_addr: addr("127.0.0.1:9000"),
            news_addr: addr("127.0.0.1:9001"),
            price_interval_ms: 1_000,
            news_interval_ms: 3_000,
            price_step: 0.5,
            initial_prices: HashMap::new(),
            seed: None,
            subscriber_queue: 256,
            write_timeout_ms: 1_000,
            stats_every: 60,
        }
    }
}

impl SourceConfig {
    pub fn price_interval(&self) -> Duration {
        Duration::from_millis(self.price_interval_ms)
    }

    pub fn news_interval(&self) -> Duration {
        Duration::from_millis(self.news_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Reconnect / timeout settings for a tick subscriber.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub connect_timeout_ms: u64,
    /// No frame for this long counts as a lost connection.
    pub read_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self { connect_timeout_ms: 2_000, read_timeout_ms: 5_000, backoff_initial_ms: 100, backoff_max_ms: 30_000 }
    }
}

impl SubscriberConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// PriceRelay settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Price endpoint to subscribe to (defaults to `source.price_addr`).
    pub price_addr: Option<SocketAddr>,
    pub subscriber: SubscriberConfig,
    /// Tick-age report cadence, in ticks (0 disables).
    pub latency_report_every: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { price_addr: None, subscriber: SubscriberConfig::default(), latency_report_every: 100 }
    }
}

/// DecisionEngine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// News endpoint to subscribe to (defaults to `source.news_addr`).
    pub news_addr: Option<SocketAddr>,
    /// Order endpoint (defaults to `intake.listen_addr`).
    pub order_addr: Option<SocketAddr>,
    /// Rolling window length per symbol.
    pub window: usize,
    /// Readings a symbol needs before it can signal. Defaults to `window`.
    pub min_history: Option<usize>,
    /// Sentiment must exceed this to confirm a bullish signal.
    pub buy_threshold: f64,
    /// Sentiment must be below this to confirm a bearish signal.
    pub sell_threshold: f64,
    pub quantity: u32,
    /// Skip an order on the same side as the last one sent for that symbol.
    pub position_gating: bool,
    pub ack_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// How long to wait for the relay to create the price book.
    pub attach_timeout_ms: u64,
    pub subscriber: SubscriberConfig,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            news_addr: None,
            order_addr: None,
            window: 5,
            min_history: None,
            buy_threshold: 0.5,
            sell_threshold: -0.5,
            quantity: 10,
            position_gating: false,
            ack_timeout_ms: 2_000,
            connect_timeout_ms: 2_000,
            attach_timeout_ms: 30_000,
            subscriber: SubscriberConfig { read_timeout_ms: 10_000, ..SubscriberConfig::default() },
        }
    }
}

impl DecisionConfig {
    pub fn min_history(&self) -> usize {
        self.min_history.unwrap_or(self.window)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }
}

/// OrderIntake settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub listen_addr: SocketAddr,
    /// Append-only order log (JSON lines).
    pub log_file: PathBuf,
    /// Idle connections are closed after this long without a request.
    pub read_timeout_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self { listen_addr: addr("127.0.0.1:9002"), log_file: PathBuf::from("orders.jsonl"), read_timeout_ms: 30_000 }
    }
}

impl IntakeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn relay_price_addr(&self) -> SocketAddr {
        self.relay.price_addr.unwrap_or(self.source.price_addr)
    }

    pub fn decision_news_addr(&self) -> SocketAddr {
        self.decision.news_addr.unwrap_or(self.source.news_addr)
    }

    pub fn decision_order_addr(&self) -> SocketAddr {
        self.decision.order_addr.unwrap_or(self.intake.listen_addr)
    }
}

/// Load and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_reference_deployment() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config.symbols, vec!["AAPL", "MSFT", "GOOGL", "AMZN"]);
        assert_eq!(config.source.price_addr.port(), 9000);
        assert_eq!(config.source.news_addr.port(), 9001);
        assert_eq!(config.intake.listen_addr.port(), 9002);
        assert_eq!(config.decision_order_addr().port(), 9002);
        assert_eq!(config.region.name, "tickwire_book");
        assert_eq!(config.decision.subscriber.read_timeout_ms, 10_000);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let json = r#"{
            "symbols": ["BTC", "ETH"],
            "source": { "price_interval_ms": 100, "seed": 7 },
            "relay": { "price_addr": "127.0.0.1:19000" },
            "decision": { "window": 20, "position_gating": true }
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.source.price_interval(), Duration::from_millis(100));
        assert_eq!(config.source.news_interval_ms, 3_000);
        assert_eq!(config.source.seed, Some(7));
        assert_eq!(config.relay_price_addr().port(), 19000);
        assert_eq!(config.decision_news_addr().port(), 9001);
        assert_eq!(config.decision.window, 20);
        assert!(config.decision.position_gating);
        assert_eq!(config.decision.quantity, 10);
    }

    #[test]
    fn validation_errors() {
        let mut config = PipelineConfig::default();
        config.symbols.push("AAPL".into());
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.decision.buy_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.decision.window = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.source.initial_prices.insert("TSLA".into(), 200.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_history_defaults_to_window_and_is_bounded_by_it() {
        let mut config = PipelineConfig::default();
        config.decision.window = 8;
        assert_eq!(config.decision.min_history(), 8);
        config.validate().unwrap();

        config.decision.min_history = Some(3);
        assert_eq!(config.decision.min_history(), 3);
        config.validate().unwrap();

        config.decision.min_history = Some(9);
        assert!(config.validate().is_err());
        config.decision.min_history = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn price_step_must_be_finite_and_bounded() {
        for step in [1e308, f64::MAX, f64::INFINITY, f64::NAN, -1e308] {
            let mut config = PipelineConfig::default();
            config.source.price_step = step;
            assert!(config.validate().is_err(), "step {step} accepted");
        }
        let mut config = PipelineConfig::default();
        config.source.price_step = 1e6;
        config.validate().unwrap();
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "intake": { "log_file": "/tmp/x.jsonl" } }"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.intake.log_file, PathBuf::from("/tmp/x.jsonl"));

        std::fs::write(&path, r#"{ "symbols": [] }"#).unwrap();
        assert!(load_config(&path).is_err());
    }
}
