//! One publisher, many TCP subscribers.
//!
//! ```text
//! publish(frame) ──► try_send ──► [queue sub 1] ──► writer task ──► socket 1
//!                ──► try_send ──► [queue sub 2] ──► writer task ──► socket 2
//! ```
//!
//! Each subscriber gets a bounded queue drained by its own writer task, so a
//! slow or dead peer can never stall the publisher or the other subscribers.
//! A subscriber whose queue is full, whose write fails or times out, or whose
//! socket reports EOF is dropped from the set and its socket closed.
//!
//! Frames are published in generation order and queues are FIFO, so every
//! subscriber sees a contiguous suffix of the stream starting at the first
//! frame published after it registered.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tw_core::wire;

/// An encoded frame shared by every subscriber queue.
pub type FrameBytes = Arc<[u8]>;

struct Subscriber {
    peer: SocketAddr,
    tx: mpsc::Sender<FrameBytes>,
}

struct Inner {
    label: String,
    queue_depth: usize,
    write_timeout: Duration,
    next_id: AtomicU64,
    subscribers: Mutex<AHashMap<u64, Subscriber>>,
}

/// Cloneable handle to a subscriber set.
#[derive(Clone)]
pub struct Fanout {
    inner: Arc<Inner>,
}

impl Fanout {
    pub fn new(label: &str, queue_depth: usize, write_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.to_string(),
                queue_depth: queue_depth.max(1),
                write_timeout,
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(AHashMap::new()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Register a queue for `peer`. Frames published from now on are delivered.
    fn attach_queue(&self, peer: SocketAddr) -> (u64, mpsc::Receiver<FrameBytes>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        self.inner.subscribers.lock().insert(id, Subscriber { peer, tx });
        (id, rx)
    }

    /// Register an accepted connection and spawn its writer task.
    pub fn register(&self, stream: TcpStream, peer: SocketAddr) -> JoinHandle<()> {
        let (id, rx) = self.attach_queue(peer);
        info!("[{}] subscriber {id} connected from {peer} ({} total)", self.inner.label, self.subscriber_count());
        let fanout = self.clone();
        tokio::spawn(async move {
            fanout.writer_loop(id, peer, stream, rx).await;
        })
    }

    /// Enqueue `frame` for every subscriber. Returns how many accepted it.
    pub fn publish(&self, frame: FrameBytes) -> usize {
        let mut dropped = Vec::new();
        let mut delivered = 0;
        {
            let subs = self.inner.subscribers.lock();
            for (id, sub) in subs.iter() {
                match sub.tx.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => dropped.push((*id, "queue full")),
                    Err(mpsc::error::TrySendError::Closed(_)) => dropped.push((*id, "writer gone")),
                }
            }
        }
        for (id, reason) in dropped {
            self.deregister(id, reason);
        }
        delivered
    }

    fn deregister(&self, id: u64, reason: &str) {
        let removed = self.inner.subscribers.lock().remove(&id);
        if let Some(sub) = removed {
            info!(
                "[{}] subscriber {id} ({}) dropped: {reason} ({} left)",
                self.inner.label,
                sub.peer,
                self.subscriber_count()
            );
        }
    }

    /// Drop every subscriber. Writers flush what is queued and close.
    pub fn close_all(&self) {
        let n = {
            let mut subs = self.inner.subscribers.lock();
            let n = subs.len();
            subs.clear();
            n
        };
        if n > 0 {
            info!("[{}] closed {n} subscribers", self.inner.label);
        }
    }

    async fn writer_loop(&self, id: u64, peer: SocketAddr, stream: TcpStream, mut rx: mpsc::Receiver<FrameBytes>) {
        let label = &self.inner.label;
        let (mut rd, mut wr) = stream.into_split();
        let mut scratch = [0u8; 64];

        let reason = loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break "closed" };
                    match tokio::time::timeout(self.inner.write_timeout, wire::write_raw(&mut wr, &frame)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!("[{label}] subscriber {id} ({peer}) write error: {e}");
                            break "write failed";
                        }
                        Err(_) => break "write timed out",
                    }
                }
                // Subscribers never send; this only notices a closed peer.
                read = rd.read(&mut scratch) => match read {
                    Ok(0) | Err(_) => break "peer disconnected",
                    Ok(_) => {}
                },
            }
        };

        self.deregister(id, reason);
        let _ = wr.shutdown().await;
    }
}

/// Accept connections into `fanout` until shutdown.
pub async fn accept_loop(listener: TcpListener, fanout: Fanout, mut shutdown: watch::Receiver<bool>) {
    let label = fanout.label().to_string();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    fanout.register(stream, peer);
                }
                Err(e) => {
                    warn!("[{label}] accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    info!("[{label}] accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 1))
    }

    fn frame(b: u8) -> FrameBytes {
        Arc::from(vec![b])
    }

    #[tokio::test]
    async fn full_queue_drops_only_that_subscriber() {
        let fanout = Fanout::new("test", 2, Duration::from_secs(1));
        let (_slow, _slow_rx) = fanout.attach_queue(peer());
        let (_fast, mut fast_rx) = fanout.attach_queue(peer());

        for i in 0..2 {
            assert_eq!(fanout.publish(frame(i)), 2);
            assert_eq!(fast_rx.recv().await.unwrap()[0], i);
        }
        // Slow queue is now full.
        assert_eq!(fanout.publish(frame(2)), 1);
        assert_eq!(fanout.subscriber_count(), 1);
        assert_eq!(fast_rx.recv().await.unwrap()[0], 2);
    }

    #[tokio::test]
    async fn closed_receiver_is_removed() {
        let fanout = Fanout::new("test", 4, Duration::from_secs(1));
        let (_, rx) = fanout.attach_queue(peer());
        drop(rx);
        assert_eq!(fanout.publish(frame(0)), 0);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_new_frames() {
        let fanout = Fanout::new("test", 8, Duration::from_secs(1));
        let (_, mut early) = fanout.attach_queue(peer());
        fanout.publish(frame(1));
        let (_, mut late) = fanout.attach_queue(peer());
        fanout.publish(frame(2));

        assert_eq!(early.recv().await.unwrap()[0], 1);
        assert_eq!(early.recv().await.unwrap()[0], 2);
        assert_eq!(late.recv().await.unwrap()[0], 2);
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_all_ends_writer_queues() {
        let fanout = Fanout::new("test", 8, Duration::from_secs(1));
        let (_, mut rx) = fanout.attach_queue(peer());
        fanout.publish(frame(9));
        fanout.close_all();
        assert_eq!(rx.recv().await.unwrap()[0], 9);
        assert!(rx.recv().await.is_none());
    }
}
