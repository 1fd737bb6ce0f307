//! Client side of the order endpoint.
//!
//! Holds at most one connection to OrderIntake. The connection is opened on
//! the first send and re-opened on the next send after any failure, or when
//! intake has closed it while idle. Each send
//! writes one request and waits for its acknowledgement; a send that fails is
//! never retried, so an order is delivered at most once.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, info};
use tw_core::wire;
use tw_core::{OrderAck, OrderRequest, PipelineError};

pub struct OrderClient {
    addr: SocketAddr,
    connect_timeout: Duration,
    ack_timeout: Duration,
    conn: Option<BufReader<TcpStream>>,
}

impl OrderClient {
    pub fn new(addr: SocketAddr, connect_timeout: Duration, ack_timeout: Duration) -> Self {
        Self { addr, connect_timeout, ack_timeout, conn: None }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connection(&mut self) -> Result<&mut BufReader<TcpStream>, PipelineError> {
        if self.conn.as_ref().is_some_and(|conn| !is_idle(conn)) {
            debug!("[order-client] held connection to {} is closed or out of sync, reconnecting", self.addr);
            self.conn = None;
        }
        if self.conn.is_none() {
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr))
                .await
                .map_err(|_| PipelineError::ConnectionLost(format!("connect {} timed out", self.addr)))?
                .map_err(|e| PipelineError::connection(&format!("connect {}", self.addr), e))?;
            let _ = stream.set_nodelay(true);
            info!("[order-client] connected to {}", self.addr);
            self.conn = Some(BufReader::new(stream));
        }
        self.conn.as_mut().ok_or_else(|| PipelineError::ConnectionLost("no connection".to_string()))
    }

    /// Send `order` and wait for its acknowledgement.
    ///
    /// Returns the log sequence number on a positive ack. A negative ack is
    /// [`PipelineError::Rejected`]; no ack in time is
    /// [`PipelineError::AcknowledgementTimeout`].
    pub async fn send(&mut self, order: &OrderRequest) -> Result<u64, PipelineError> {
        let result = self.round_trip(order).await;
        // Intake closes its side after a rejection too.
        if let Err(e) = &result {
            debug!("[order-client] dropping connection after: {e}");
            self.conn = None;
        }
        result
    }

    async fn round_trip(&mut self, order: &OrderRequest) -> Result<u64, PipelineError> {
        let ack_timeout = self.ack_timeout;
        let conn = self.connection().await?;
        wire::write_message(conn.get_mut(), order).await?;

        let ack: OrderAck = match tokio::time::timeout(ack_timeout, wire::read_message(conn)).await {
            Err(_) => return Err(PipelineError::AcknowledgementTimeout(ack_timeout)),
            Ok(Ok(Some(ack))) => ack,
            Ok(Ok(None)) => return Err(PipelineError::ConnectionLost("intake closed before acknowledging".into())),
            Ok(Err(e)) => return Err(e),
        };

        if ack.accepted {
            Ok(ack.seq.unwrap_or_default())
        } else {
            Err(PipelineError::Rejected(ack.reason.unwrap_or_else(|| "no reason given".to_string())))
        }
    }

    pub fn close(&mut self) {
        self.conn = None;
    }
}

/// A reusable connection has nothing buffered and nothing pending on the
/// socket. EOF means intake closed it; stray bytes mean the stream is out of
/// step with our requests.
fn is_idle(conn: &BufReader<TcpStream>) -> bool {
    if !conn.buffer().is_empty() {
        return false;
    }
    let mut byte = [0u8; 1];
    matches!(conn.get_ref().try_read(&mut byte), Err(e) if e.kind() == ErrorKind::WouldBlock)
}
