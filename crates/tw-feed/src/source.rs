//! Price and news source.
//!
//! Binds two listeners, one per stream, and runs one timer task per stream:
//!
//! ```text
//! price timer ─► RandomWalk.advance ─► encode ─► Fanout(price) ─► subscribers
//! news timer  ─► SentimentGen.next  ─► encode ─► Fanout(news)  ─► subscribers
//! ```
//!
//! Each price round emits one tick per configured symbol. Frames are encoded
//! once and shared by every subscriber queue.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tw_core::config::{PipelineConfig, SourceConfig};
use tw_core::service::{FatalSender, Service};
use tw_core::time_util::now_us;
use tw_core::wire::{self, WireMessage};

use crate::fanout::{self, Fanout};
use crate::generator::{RandomWalk, SentimentGen};

const NAME: &str = "source";

pub struct PriceNewsSource {
    config: SourceConfig,
    symbols: Vec<String>,
    price_fanout: Option<Fanout>,
    news_fanout: Option<Fanout>,
    price_addr: Option<SocketAddr>,
    news_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PriceNewsSource {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.source.clone(),
            symbols: config.symbols.clone(),
            price_fanout: None,
            news_fanout: None,
            price_addr: None,
            news_addr: None,
            shutdown_tx: None,
            tasks: Vec::new(),
        }
    }

    /// Bound price address (resolves port 0) once started.
    pub fn price_addr(&self) -> Option<SocketAddr> {
        self.price_addr
    }

    pub fn news_addr(&self) -> Option<SocketAddr> {
        self.news_addr
    }

    pub fn price_subscribers(&self) -> usize {
        self.price_fanout.as_ref().map_or(0, Fanout::subscriber_count)
    }

    pub fn news_subscribers(&self) -> usize {
        self.news_fanout.as_ref().map_or(0, Fanout::subscriber_count)
    }
}

#[async_trait]
impl Service for PriceNewsSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&mut self, _fatal: FatalSender) -> Result<()> {
        let cfg = &self.config;
        let walk = RandomWalk::new(&self.symbols, &cfg.initial_prices, cfg.price_step, cfg.seed)?;
        // Distinct stream from the walk when seeded.
        let sentiment = SentimentGen::new(cfg.seed.map(|s| s.wrapping_add(1)));

        let price_listener = TcpListener::bind(cfg.price_addr).await?;
        let news_listener = TcpListener::bind(cfg.news_addr).await?;
        self.price_addr = Some(price_listener.local_addr()?);
        self.news_addr = Some(news_listener.local_addr()?);

        let price_fanout = Fanout::new("source-price", cfg.subscriber_queue, cfg.write_timeout());
        let news_fanout = Fanout::new("source-news", cfg.subscriber_queue, cfg.write_timeout());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.tasks.push(tokio::spawn(fanout::accept_loop(price_listener, price_fanout.clone(), shutdown_rx.clone())));
        self.tasks.push(tokio::spawn(fanout::accept_loop(news_listener, news_fanout.clone(), shutdown_rx.clone())));

        let (interval, stats_every) = (cfg.price_interval(), cfg.stats_every);
        let fo = price_fanout.clone();
        let rx = shutdown_rx.clone();
        let mut walk = walk;
        self.tasks.push(tokio::spawn(async move {
            timer_loop(fo, interval, stats_every, rx, move |ts| walk.advance(ts)).await;
        }));

        let interval = cfg.news_interval();
        let fo = news_fanout.clone();
        let mut sentiment = sentiment;
        self.tasks.push(tokio::spawn(async move {
            timer_loop(fo, interval, stats_every, shutdown_rx, move |ts| vec![sentiment.next(ts)]).await;
        }));

        info!(
            "[{NAME}] prices on {} every {:?} ({} symbols), news on {} every {:?}",
            self.price_addr.map(|a| a.to_string()).unwrap_or_default(),
            cfg.price_interval(),
            self.symbols.len(),
            self.news_addr.map(|a| a.to_string()).unwrap_or_default(),
            cfg.news_interval(),
        );

        self.price_fanout = Some(price_fanout);
        self.news_fanout = Some(news_fanout);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        for fanout in [self.price_fanout.take(), self.news_fanout.take()].into_iter().flatten() {
            fanout.close_all();
        }
        info!("[{NAME}] stopped");
        Ok(())
    }
}

/// Tick `generate` on a fixed interval and publish what it returns.
async fn timer_loop<M, F>(
    fanout: Fanout,
    interval: Duration,
    stats_every: u64,
    mut shutdown: watch::Receiver<bool>,
    mut generate: F,
) where
    M: WireMessage,
    F: FnMut(u64) -> Vec<M> + Send,
{
    let label = fanout.label().to_string();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut rounds: u64 = 0;
    let mut frames: u64 = 0;
    let mut window_start = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        for msg in generate(now_us()) {
            match wire::encode_frame(&msg) {
                Ok(bytes) => {
                    fanout.publish(bytes.into());
                    frames += 1;
                }
                Err(e) => error!("[{label}] encode failed: {e}"),
            }
        }

        rounds += 1;
        if stats_every > 0 && rounds % stats_every == 0 {
            let secs = window_start.elapsed().as_secs_f64();
            info!(
                "[{label}] {frames} frames in {secs:.1}s ({:.1}/s), {} subscribers",
                frames as f64 / secs.max(f64::EPSILON),
                fanout.subscriber_count()
            );
            frames = 0;
            window_start = Instant::now();
        }
    }
    info!("[{label}] timer stopped after {rounds} rounds");
}
