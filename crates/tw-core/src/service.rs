//! Lifecycle contract shared by the four pipeline roles.
//!
//! The runner constructs one [`Service`], starts it, then waits for either a
//! shutdown signal or the first [`Fatal`] report from the service's tasks.
//! Transient failures (lost connections) never reach this channel; they are
//! retried inside the service.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::PipelineError;

/// A failure that must terminate the process.
#[derive(Debug)]
pub struct Fatal {
    /// Role and sub-component, e.g. `"relay"`.
    pub component: String,
    /// What was being attempted, e.g. `"book write"`.
    pub operation: String,
    pub error: PipelineError,
}

impl std::fmt::Display for Fatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} failed: {}", self.component, self.operation, self.error)
    }
}

pub type FatalSender = mpsc::UnboundedSender<Fatal>;
pub type FatalReceiver = mpsc::UnboundedReceiver<Fatal>;

pub fn fatal_channel() -> (FatalSender, FatalReceiver) {
    mpsc::unbounded_channel()
}

/// Log a fatal condition and hand it to the runner.
pub fn report_fatal(tx: &FatalSender, component: &str, operation: &str, error: PipelineError) {
    let fatal = Fatal { component: component.to_string(), operation: operation.to_string(), error };
    error!("{fatal}");
    // Runner already gone means we are shutting down anyway.
    let _ = tx.send(fatal);
}

/// Trait implemented by every pipeline role.
///
/// Only `Send` is required: the runner drives one service sequentially.
#[async_trait]
pub trait Service: Send {
    /// Human-readable role name.
    fn name(&self) -> &str;

    /// Bind / connect / attach and spawn the role's tasks.
    ///
    /// Errors returned here are startup failures; failures after startup go
    /// through `fatal`.
    async fn start(&mut self, fatal: FatalSender) -> anyhow::Result<()>;

    /// Stop timers and accept loops, close sockets, release owned resources.
    async fn stop(&mut self) -> anyhow::Result<()>;
}
