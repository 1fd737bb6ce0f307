//! Order intake endpoint.
//!
//! One task per accepted connection. Each task loops:
//!
//! 1. read one frame (bounded by the idle read timeout);
//! 2. decode and validate it as an [`OrderRequest`];
//! 3. valid: append to the order log, then reply with a positive ack carrying
//!    the log sequence number and wait for the next request;
//! 4. invalid: reply with a negative ack and close the connection. Nothing is
//!    logged for it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use tw_core::config::{IntakeConfig, PipelineConfig};
use tw_core::service::{FatalSender, Service};
use tw_core::wire;
use tw_core::{OrderAck, OrderRequest, PipelineError};

use crate::order_log::{self, OrderLogHandle};

const NAME: &str = "intake";

pub struct OrderIntake {
    config: IntakeConfig,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    log_task: Option<JoinHandle<()>>,
}

impl OrderIntake {
    pub fn new(config: &PipelineConfig) -> Self {
        Self { config: config.intake.clone(), local_addr: None, shutdown_tx: None, accept_task: None, log_task: None }
    }

    /// Bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl Service for OrderIntake {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&mut self, _fatal: FatalSender) -> Result<()> {
        let (log, log_task) = order_log::open(&self.config.log_file).await?;
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.accept_task = Some(tokio::spawn(accept_loop(listener, log, self.config.read_timeout(), shutdown_rx)));
        self.log_task = Some(log_task);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(addr);
        info!("[{NAME}] listening on {addr}, logging to {}", self.config.log_file.display());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        // Every log handle is gone once the connections are; the writer drains and exits.
        if let Some(task) = self.log_task.take() {
            let _ = task.await;
        }
        info!("[{NAME}] stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    log: OrderLogHandle,
    read_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    debug!("[{NAME}] connection from {peer}");
                    connections.spawn(serve_connection(stream, peer, log.clone(), read_timeout, shutdown.clone()));
                }
                Err(e) => {
                    warn!("[{NAME}] accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            // Reap finished connections so the set stays small.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(log);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    log: OrderLogHandle,
    read_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conn = BufReader::new(stream);
    let mut served: u64 = 0;

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            read = tokio::time::timeout(read_timeout, wire::read_frame(&mut conn)) => read,
        };

        let frame = match frame {
            Err(_) => {
                debug!("[{NAME}] {peer} idle for {read_timeout:?}, closing");
                break;
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(PipelineError::MalformedMessage(reason))) => {
                reject(&mut conn, peer, &reason).await;
                break;
            }
            Ok(Err(e)) => {
                debug!("[{NAME}] {peer}: {e}");
                break;
            }
        };

        let decoded = frame.decode::<OrderRequest>().map_err(|e| e.to_string());
        let order = match decoded.and_then(|o| o.validate().map(|()| o)) {
            Ok(order) => order,
            Err(reason) => {
                reject(&mut conn, peer, &reason).await;
                break;
            }
        };

        let summary = format!("{} {} {} @ {:.2}", order.side, order.quantity, order.symbol, order.price);
        let ack = match log.append(order, peer).await {
            Ok(seq) => {
                info!("[{NAME}] #{seq} {summary} from {peer}");
                OrderAck::accepted(seq)
            }
            Err(e) => {
                warn!("[{NAME}] could not record order from {peer}: {e}");
                OrderAck::rejected(format!("order log unavailable: {e}"))
            }
        };
        let accepted = ack.accepted;
        if let Err(e) = wire::write_message(&mut conn, &ack).await {
            debug!("[{NAME}] ack to {peer} failed: {e}");
            break;
        }
        if !accepted {
            break;
        }
        served += 1;
    }

    let _ = conn.shutdown().await;
    debug!("[{NAME}] {peer} closed after {served} orders");
}

async fn reject(conn: &mut BufReader<TcpStream>, peer: SocketAddr, reason: &str) {
    warn!("[{NAME}] rejected frame from {peer}: {reason}");
    let _ = wire::write_message(conn, &OrderAck::rejected(reason)).await;
}
