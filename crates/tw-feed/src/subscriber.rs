//! Reconnecting tick subscriber.
//!
//! Connects to a broadcast endpoint, decodes frames of one message type and
//! forwards them into an mpsc channel consumed by the owning service.
//!
//! # Connection lifecycle
//!
//! 1. Connect with a timeout.
//! 2. Read frames; each read is bounded by the idle timeout.
//! 3. On EOF, I/O error, idle timeout or a malformed frame, drop the
//!    connection and reconnect after an exponential backoff
//!    (initial -> doubling -> max), reset after every successful connect.
//! 4. Exit when the shutdown flag flips or the consumer drops its receiver.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tw_core::config::SubscriberConfig;
use tw_core::wire::{self, WireMessage};
use tw_core::PipelineError;

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self { initial, max: max.max(initial), current: initial }
    }

    /// Delay to wait now; doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Everything one subscription needs.
pub struct SubscriberParams {
    pub label: String,
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub backoff: Backoff,
}

impl SubscriberParams {
    pub fn new(label: &str, addr: SocketAddr, cfg: &SubscriberConfig) -> Self {
        Self {
            label: label.to_string(),
            addr,
            connect_timeout: cfg.connect_timeout(),
            read_timeout: cfg.read_timeout(),
            backoff: Backoff::new(cfg.backoff_initial(), cfg.backoff_max()),
        }
    }
}

/// Run until shutdown, forwarding every decoded `M` into `tx`.
pub async fn run_subscriber<M>(params: SubscriberParams, tx: mpsc::Sender<M>, mut shutdown: watch::Receiver<bool>)
where
    M: WireMessage + Send + 'static,
{
    let SubscriberParams { label, addr, connect_timeout, read_timeout, mut backoff } = params;

    loop {
        if *shutdown.borrow() {
            info!("[{label}] shutdown requested");
            return;
        }

        let failure = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                backoff.reset();
                info!("[{label}] connected to {addr}");
                let _ = stream.set_nodelay(true);
                match read_stream(&label, stream, read_timeout, &tx, &mut shutdown).await {
                    StreamEnd::Shutdown => {
                        info!("[{label}] shutdown signal received");
                        return;
                    }
                    StreamEnd::ConsumerGone => {
                        info!("[{label}] consumer dropped, stopping");
                        return;
                    }
                    StreamEnd::Lost(e) => e,
                }
            }
            Ok(Err(e)) => PipelineError::connection(&format!("connect {addr}"), e),
            Err(_) => PipelineError::ConnectionLost(format!("connect {addr} timed out after {connect_timeout:?}")),
        };

        let delay = backoff.next_delay();
        warn!("[{label}] {failure}, reconnecting in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown.changed() => return,
        }
    }
}

enum StreamEnd {
    Shutdown,
    ConsumerGone,
    Lost(PipelineError),
}

async fn read_stream<M>(
    label: &str,
    stream: TcpStream,
    read_timeout: Duration,
    tx: &mpsc::Sender<M>,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd
where
    M: WireMessage,
{
    let mut reader = BufReader::new(stream);
    let mut received: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return StreamEnd::Shutdown,
            read = tokio::time::timeout(read_timeout, wire::read_message::<_, M>(&mut reader)) => match read {
                Ok(Ok(Some(msg))) => {
                    received += 1;
                    if tx.send(msg).await.is_err() {
                        return StreamEnd::ConsumerGone;
                    }
                }
                Ok(Ok(None)) => {
                    debug!("[{label}] peer closed after {received} messages");
                    return StreamEnd::Lost(PipelineError::ConnectionLost("peer closed".to_string()));
                }
                Ok(Err(e)) => return StreamEnd::Lost(e),
                Err(_) => {
                    return StreamEnd::Lost(PipelineError::ConnectionLost(format!("no data for {read_timeout:?}")));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tw_core::SentimentTick;

    fn params(addr: SocketAddr) -> SubscriberParams {
        SubscriberParams {
            label: "test".into(),
            addr,
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_secs(5),
            backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        }
    }

    #[test]
    fn backoff_doubles_to_ceiling_and_resets() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(30_000));
        let delays: Vec<_> = (0..10).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 30000]);
        assert_eq!(b.next_delay().as_millis(), 30000);
        b.reset();
        assert_eq!(b.next_delay().as_millis(), 100);
    }

    #[tokio::test]
    async fn reconnects_after_peer_drop_and_bad_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_subscriber::<SentimentTick>(params(addr), tx, stop_rx));

        // First connection: one good tick, then hang up.
        let (mut conn, _) = listener.accept().await.unwrap();
        wire::write_message(&mut conn, &SentimentTick::new(0.1, 1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().timestamp_us, 1);
        drop(conn);

        // Second connection: a frame with an unknown type.
        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(&[0, 0, 0, 1, 99]).await.unwrap();

        // Third connection: stream resumes.
        let (mut conn, _) = listener.accept().await.unwrap();
        wire::write_message(&mut conn, &SentimentTick::new(-0.3, 2)).await.unwrap();
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.timestamp_us, 2);
        assert_eq!(tick.score, -0.3);
        drop(conn);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn keeps_retrying_until_endpoint_appears() {
        // Reserve a port, then free it so the first attempts are refused.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let (tx, mut rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_subscriber::<SentimentTick>(params(addr), tx, stop_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        let (mut conn, _) = listener.accept().await.unwrap();
        wire::write_message(&mut conn, &SentimentTick::new(0.9, 7)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().timestamp_us, 7);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
