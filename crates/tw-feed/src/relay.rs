//! Price relay: price stream in, shared price book out.
//!
//! The relay owns the book when it is the one that creates it, so closing the
//! relay withdraws the region and attached readers see
//! [`tw_core::PipelineError::RegionUnavailable`]. A tick for a symbol the book does not
//! track is fatal: it means the source and the book disagree on the symbol
//! list.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tw_core::book::SharedPriceBook;
use tw_core::config::PipelineConfig;
use tw_core::latency::AgeHistogram;
use tw_core::service::{report_fatal, FatalSender, Service};
use tw_core::time_util::age_us;
use tw_core::PriceTick;

use crate::subscriber::{run_subscriber, SubscriberParams};

const NAME: &str = "relay";
const TICK_CHANNEL: usize = 1024;

pub struct PriceRelay {
    config: PipelineConfig,
    book: Option<Arc<SharedPriceBook>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PriceRelay {
    pub fn new(config: &PipelineConfig) -> Self {
        Self { config: config.clone(), book: None, shutdown_tx: None, tasks: Vec::new() }
    }

    pub fn book(&self) -> Option<&SharedPriceBook> {
        self.book.as_deref()
    }
}

#[async_trait]
impl Service for PriceRelay {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&mut self, fatal: FatalSender) -> Result<()> {
        let region = &self.config.region;
        let book = Arc::new(SharedPriceBook::open_or_create_in(&region.dir(), &region.name, &self.config.symbols)?);
        info!(
            "[{NAME}] price book '{}' ready ({} symbols, owner={})",
            book.name(),
            book.symbols().len(),
            book.is_owner()
        );

        let addr = self.config.relay_price_addr();
        let params = SubscriberParams::new("relay-price", addr, &self.config.relay.subscriber);
        let (tx, rx) = mpsc::channel::<PriceTick>(TICK_CHANNEL);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.tasks.push(tokio::spawn(run_subscriber(params, tx, shutdown_rx)));
        let report_every = self.config.relay.latency_report_every;
        let apply_book = book.clone();
        self.tasks.push(tokio::spawn(async move {
            apply_loop(apply_book, rx, fatal, report_every).await;
        }));

        self.book = Some(book);
        self.shutdown_tx = Some(shutdown_tx);
        info!("[{NAME}] subscribed to prices at {addr}");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        // The subscriber exits on the flag; the apply loop ends when its
        // channel closes.
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(book) = self.book.take() {
            match Arc::try_unwrap(book) {
                Ok(book) => book.close()?,
                Err(_) => warn!("[{NAME}] price book still referenced, released on drop"),
            }
        }
        info!("[{NAME}] stopped");
        Ok(())
    }
}

async fn apply_loop(
    book: Arc<SharedPriceBook>,
    mut rx: mpsc::Receiver<PriceTick>,
    fatal: FatalSender,
    report_every: u64,
) {
    let mut ages = AgeHistogram::new();
    while let Some(tick) = rx.recv().await {
        let symbol = tick.symbol();
        if let Err(e) = book.write(symbol, tick.price) {
            let op = format!("book write {symbol}");
            report_fatal(&fatal, NAME, &op, e);
            return;
        }
        debug!("[{NAME}] {symbol} = {:.2}", tick.price);

        ages.record(age_us(tick.timestamp_us));
        if report_every > 0 && ages.count() >= report_every {
            if let Some(stats) = ages.take() {
                info!("[{NAME}] tick age {stats}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PriceNewsSource;
    use std::time::Duration;
    use tw_core::service::fatal_channel;
    use tw_core::PipelineError;

    fn config(dir: &std::path::Path, region: &str, symbols: &[&str]) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.symbols = symbols.iter().map(|s| s.to_string()).collect();
        cfg.region.name = region.to_string();
        cfg.region.dir = Some(dir.to_path_buf());
        cfg.source.price_addr = "127.0.0.1:0".parse().unwrap();
        cfg.source.news_addr = "127.0.0.1:0".parse().unwrap();
        cfg.source.price_interval_ms = 10;
        cfg.source.seed = Some(5);
        cfg.relay.subscriber.backoff_initial_ms = 10;
        cfg
    }

    #[tokio::test]
    async fn relay_fills_book_from_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "relay_fill", &["AAPL", "MSFT", "GOOGL"]);
        cfg.source.initial_prices.insert("AAPL".into(), 150.0);

        let mut source = PriceNewsSource::new(&cfg);
        let (fatal_tx, mut fatal_rx) = fatal_channel();
        source.start(fatal_tx.clone()).await.unwrap();
        cfg.relay.price_addr = source.price_addr();

        let mut relay = PriceRelay::new(&cfg);
        relay.start(fatal_tx).await.unwrap();
        assert!(relay.book().unwrap().is_owner());

        let reader = SharedPriceBook::attach_in(dir.path(), "relay_fill", &cfg.symbols).unwrap();
        let mut filled = false;
        for _ in 0..200 {
            let snap = reader.read_all().unwrap();
            if snap.entries().iter().all(|e| e.is_set()) {
                filled = true;
                let aapl = snap.price("AAPL").unwrap();
                assert!(aapl > 100.0 && aapl < 200.0);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(filled);
        assert!(fatal_rx.try_recv().is_err());

        relay.stop().await.unwrap();
        assert!(matches!(reader.read_all(), Err(PipelineError::RegionUnavailable(_))));
        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_symbol_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let src_cfg = config(dir.path(), "relay_unknown", &["AAPL", "TSLA"]);
        let mut source = PriceNewsSource::new(&src_cfg);
        let (fatal_tx, mut fatal_rx) = fatal_channel();
        source.start(fatal_tx.clone()).await.unwrap();

        let mut relay_cfg = config(dir.path(), "relay_unknown", &["AAPL"]);
        relay_cfg.relay.price_addr = source.price_addr();
        let mut relay = PriceRelay::new(&relay_cfg);
        relay.start(fatal_tx).await.unwrap();

        let fatal = tokio::time::timeout(Duration::from_secs(5), fatal_rx.recv()).await.unwrap().unwrap();
        assert_eq!(fatal.component, "relay");
        assert!(matches!(fatal.error, PipelineError::UnknownSymbol(ref s) if s == "TSLA"));
        assert!(fatal.error.is_fatal());

        relay.stop().await.unwrap();
        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn relay_waits_for_late_source() {
        let dir = tempfile::tempdir().unwrap();
        // Pick a free port for the source, then start the relay first.
        let free_port = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = free_port.local_addr().unwrap();
        drop(free_port);

        let mut cfg = config(dir.path(), "relay_late", &["AAPL"]);
        cfg.source.price_addr = addr;
        let (fatal_tx, _fatal_rx) = fatal_channel();
        let mut relay = PriceRelay::new(&cfg);
        relay.start(fatal_tx.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut source = PriceNewsSource::new(&cfg);
        source.start(fatal_tx).await.unwrap();

        let book = relay.book().unwrap();
        let mut set = false;
        for _ in 0..300 {
            if book.read_all().unwrap().get("AAPL").is_some_and(|e| e.is_set()) {
                set = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(set);

        relay.stop().await.unwrap();
        source.stop().await.unwrap();
    }
}
