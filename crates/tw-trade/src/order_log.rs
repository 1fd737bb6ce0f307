//! Append-only JSON-lines order log.
//!
//! One line per accepted order:
//!
//! ```json
//! {"seq":1,"received_us":1700000000000000,"peer":"127.0.0.1:53122","order":{...}}
//! ```
//!
//! All appends go through one writer task, so lines never interleave and
//! sequence numbers follow file order. An append completes only after the
//! line is written and `sync_data` returned. Reopening an existing log
//! continues its numbering.
//!
//! A write that fails part way, or a crash mid-append, can leave a partial
//! line at the end of the file. The next record then starts on a fresh line,
//! so only the partial one is unreadable.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tw_core::time_util::now_us;
use tw_core::{OrderRequest, PipelineError};

const APPEND_QUEUE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLogRecord {
    pub seq: u64,
    pub received_us: u64,
    pub peer: String,
    pub order: OrderRequest,
}

struct AppendRequest {
    order: OrderRequest,
    peer: SocketAddr,
    reply: oneshot::Sender<Result<u64, PipelineError>>,
}

/// Cloneable handle used by connection tasks.
#[derive(Clone)]
pub struct OrderLogHandle {
    tx: mpsc::Sender<AppendRequest>,
}

impl OrderLogHandle {
    /// Append `order` and return its sequence number once it is durable.
    pub async fn append(&self, order: OrderRequest, peer: SocketAddr) -> Result<u64, PipelineError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(AppendRequest { order, peer, reply })
            .await
            .map_err(|_| PipelineError::Io(std::io::Error::other("order log writer stopped")))?;
        done.await.map_err(|_| PipelineError::Io(std::io::Error::other("order log writer dropped request")))?
    }
}

/// Open (or create) the log at `path` and spawn its writer task.
///
/// The task exits once every handle is dropped.
pub async fn open(path: &Path) -> Result<(OrderLogHandle, JoinHandle<()>), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let (last_seq, torn) = scan(path).await?;
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    if torn {
        warn!("[order-log] {} ends in a partial line, next record starts a new one", path.display());
    }
    info!("[order-log] {} open, next seq {}", path.display(), last_seq + 1);

    let (tx, rx) = mpsc::channel(APPEND_QUEUE);
    let task = tokio::spawn(writer_loop(LineWriter { file, torn }, path.to_path_buf(), last_seq, rx));
    Ok((OrderLogHandle { tx }, task))
}

async fn writer_loop(mut writer: LineWriter, path: PathBuf, mut seq: u64, mut rx: mpsc::Receiver<AppendRequest>) {
    while let Some(req) = rx.recv().await {
        let record = OrderLogRecord {
            seq: seq + 1,
            received_us: now_us(),
            peer: req.peer.to_string(),
            order: req.order,
        };
        let result = writer.append(&record).await;
        match &result {
            Ok(()) => seq += 1,
            Err(e) => error!("[order-log] append to {} failed: {e}", path.display()),
        }
        let _ = req.reply.send(result.map(|()| record.seq));
    }
    info!("[order-log] writer stopped at seq {seq}");
}

struct LineWriter {
    file: File,
    /// The file may end mid-line.
    torn: bool,
}

impl LineWriter {
    async fn append(&mut self, record: &OrderLogRecord) -> Result<(), PipelineError> {
        let mut line = Vec::with_capacity(256);
        if self.torn {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record).map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;
        line.push(b'\n');

        let result = self.write_durably(&line).await;
        self.torn = result.is_err();
        result
    }

    async fn write_durably(&mut self, line: &[u8]) -> Result<(), PipelineError> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

/// Highest sequence number in the log, and whether it ends mid-line.
async fn scan(path: &Path) -> Result<(u64, bool), PipelineError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, false)),
        Err(e) => return Err(e.into()),
    };
    let torn = bytes.last().is_some_and(|b| *b != b'\n');
    let content = String::from_utf8_lossy(&bytes);
    let mut last = 0;
    for (n, line) in content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        match serde_json::from_str::<OrderLogRecord>(line) {
            Ok(rec) => last = last.max(rec.seq),
            Err(e) => warn!("[order-log] skipping unreadable line {}: {e}", n + 1),
        }
    }
    Ok((last, torn))
}

/// Read every record in the log, skipping unreadable lines.
pub fn read_records(path: &Path) -> Result<Vec<OrderLogRecord>, PipelineError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).lines().filter_map(|l| serde_json::from_str(l).ok()).collect())
}
