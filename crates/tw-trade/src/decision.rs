//! Decision engine.
//!
//! ```text
//! news endpoint ─► TickSubscriber ─► SentimentTick ─┐
//!                                                   ▼
//! price book ──────────── read_all ──────────► Strategy.evaluate ─► OrderClient ─► intake
//! ```
//!
//! Every sentiment tick triggers one snapshot of the book. Each symbol that
//! has been written at least once updates its rolling window and may produce
//! one order once its window holds `min_history` readings. Orders are sent
//! in snapshot order, one at a time.

use std::time::Duration;

use ahash::AHashMap;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tw_core::book::{SharedPriceBook, Snapshot};
use tw_core::config::{DecisionConfig, PipelineConfig};
use tw_core::service::{report_fatal, FatalSender, Service};
use tw_core::time_util::now_us;
use tw_core::{OrderRequest, PipelineError, SentimentTick, Side};
use tw_feed::subscriber::{run_subscriber, Backoff, SubscriberParams};
use uuid::Uuid;

use crate::order_client::OrderClient;
use crate::signal::{decide, SignalBook, Thresholds};

const NAME: &str = "decision";
const NEWS_CHANNEL: usize = 64;

/// The trading rule, independent of sockets and the region.
pub struct Strategy {
    signals: SignalBook,
    thresholds: Thresholds,
    quantity: u32,
    position_gating: bool,
    last_side: AHashMap<String, Side>,
}

impl Strategy {
    pub fn new(cfg: &DecisionConfig) -> Self {
        Self {
            signals: SignalBook::new(cfg.window, cfg.min_history()),
            thresholds: Thresholds { buy: cfg.buy_threshold, sell: cfg.sell_threshold },
            quantity: cfg.quantity,
            position_gating: cfg.position_gating,
            last_side: AHashMap::new(),
        }
    }

    /// Orders implied by `snapshot` under `sentiment`. Updates every
    /// observed symbol's window, whether or not it trades.
    pub fn evaluate(&mut self, snapshot: &Snapshot, sentiment: &SentimentTick) -> Vec<OrderRequest> {
        let score = sentiment.score;
        let mut orders = Vec::new();

        for entry in snapshot.entries().iter().filter(|e| e.is_set()) {
            let obs = self.signals.observe(&entry.symbol, entry.price);
            let Some(side) = decide(obs.signal, score, self.thresholds) else {
                continue;
            };
            if self.position_gating && self.last_side.get(&entry.symbol) == Some(&side) {
                debug!("[{NAME}] {} already {side}, skipping", entry.symbol);
                continue;
            }

            let mut order = OrderRequest::new(entry.symbol.clone(), side, self.quantity, entry.price);
            order.order_id = Uuid::new_v4().to_string();
            order.sentiment = Some(score);
            order.moving_average = obs.mean;
            order.reason = Some(format!(
                "price {:.2} {} mean {:.2}, sentiment {score:.2}",
                entry.price,
                if side == Side::Buy { "above" } else { "below" },
                obs.mean.unwrap_or_default()
            ));
            order.timestamp_us = now_us();
            orders.push(order);
        }
        orders
    }

    /// Remember an acknowledged order for position gating.
    pub fn record_sent(&mut self, order: &OrderRequest) {
        self.last_side.insert(order.symbol.clone(), order.side);
    }
}

pub struct DecisionEngine {
    config: PipelineConfig,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DecisionEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self { config: config.clone(), shutdown_tx: None, tasks: Vec::new() }
    }
}

/// Attach read-only, waiting for the region to appear.
///
/// Layout disagreements fail at once; a missing region is retried until
/// `attach_timeout` elapses.
async fn attach_book(config: &PipelineConfig) -> Result<SharedPriceBook, PipelineError> {
    let region = &config.region;
    let deadline = tokio::time::Instant::now() + config.decision.attach_timeout();
    let sub = &config.decision.subscriber;
    let mut backoff = Backoff::new(sub.backoff_initial(), sub.backoff_max().min(Duration::from_secs(2)));

    loop {
        match SharedPriceBook::attach_in(&region.dir(), &region.name, &config.symbols) {
            Ok(book) => return Ok(book),
            Err(PipelineError::RegionUnavailable(reason)) => {
                let delay = backoff.next_delay();
                if tokio::time::Instant::now() + delay > deadline {
                    return Err(PipelineError::RegionUnavailable(format!(
                        "{reason} (gave up after {:?})",
                        config.decision.attach_timeout()
                    )));
                }
                info!("[{NAME}] waiting for price book: {reason}, retry in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl Service for DecisionEngine {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&mut self, fatal: FatalSender) -> Result<()> {
        let book = attach_book(&self.config).await?;
        let cfg = &self.config.decision;

        let news_addr = self.config.decision_news_addr();
        let order_addr = self.config.decision_order_addr();
        let params = SubscriberParams::new("decision-news", news_addr, &cfg.subscriber);
        let (tx, rx) = mpsc::channel::<SentimentTick>(NEWS_CHANNEL);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let strategy = Strategy::new(cfg);
        let client = OrderClient::new(order_addr, cfg.connect_timeout(), cfg.ack_timeout());

        self.tasks.push(tokio::spawn(run_subscriber(params, tx, shutdown_rx)));
        self.tasks.push(tokio::spawn(engine_loop(book, rx, strategy, client, fatal)));
        self.shutdown_tx = Some(shutdown_tx);

        info!(
            "[{NAME}] news from {news_addr}, orders to {order_addr}, window {} (min {}) thresholds +{}/{}",
            cfg.window,
            cfg.min_history(),
            cfg.buy_threshold,
            cfg.sell_threshold
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("[{NAME}] stopped");
        Ok(())
    }
}

async fn engine_loop(
    book: SharedPriceBook,
    mut rx: mpsc::Receiver<SentimentTick>,
    mut strategy: Strategy,
    mut client: OrderClient,
    fatal: FatalSender,
) {
    let (mut sent, mut failed) = (0u64, 0u64);

    while let Some(tick) = rx.recv().await {
        let snapshot = match book.read_all() {
            Ok(s) => s,
            Err(e) => {
                report_fatal(&fatal, NAME, "price book snapshot", e);
                return;
            }
        };

        let orders = strategy.evaluate(&snapshot, &tick);
        debug!("[{NAME}] sentiment {:.2} -> {} orders", tick.score, orders.len());

        for order in orders {
            match client.send(&order).await {
                Ok(seq) => {
                    sent += 1;
                    info!(
                        "[{NAME}] order #{seq} {} {} {} @ {:.2}",
                        order.side, order.quantity, order.symbol, order.price
                    );
                    strategy.record_sent(&order);
                }
                Err(PipelineError::Rejected(reason)) => {
                    failed += 1;
                    warn!("[{NAME}] order {} {} rejected: {reason}", order.side, order.symbol);
                }
                Err(e) => {
                    failed += 1;
                    warn!("[{NAME}] order {} {} not sent: {e}", order.side, order.symbol);
                }
            }
        }
    }

    client.close();
    info!("[{NAME}] engine stopped ({sent} orders sent, {failed} failed)");
}
