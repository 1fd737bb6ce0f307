//! Typed error definitions for the tickwire pipeline.
//!
//! [`PipelineError`] carries the failure taxonomy shared by every role. Service
//! and binary boundaries wrap it in `anyhow::Error`; the variants themselves
//! decide whether a failure is recovered locally or terminates the process.

use std::time::Duration;

use thiserror::Error;

/// Domain-specific errors for the tickwire pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Peer socket closed, reset, or timed out.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A book operation named a symbol outside the registered set.
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    /// An attaching process disagrees with the region layout.
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),

    /// The region was never created or its owner has released it.
    #[error("region unavailable: {0}")]
    RegionUnavailable(String),

    /// Framing or payload decoding failure on a socket.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// OrderIntake did not answer within the allotted time.
    #[error("acknowledgement timed out after {0:?}")]
    AcknowledgementTimeout(Duration),

    /// OrderIntake answered with a negative acknowledgement.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// A write was attempted through a read-only region handle.
    #[error("region '{0}' is attached read-only")]
    ReadOnly(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Local file or mapping I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Data-integrity and setup failures that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownSymbol(_)
                | Self::LayoutMismatch(_)
                | Self::RegionUnavailable(_)
                | Self::ReadOnly(_)
                | Self::Config(_)
        )
    }

    /// Map a socket I/O error to [`PipelineError::ConnectionLost`].
    pub fn connection(context: &str, err: std::io::Error) -> Self {
        Self::ConnectionLost(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(PipelineError::UnknownSymbol("TSLA".into()).is_fatal());
        assert!(PipelineError::LayoutMismatch("slots".into()).is_fatal());
        assert!(PipelineError::RegionUnavailable("gone".into()).is_fatal());
        assert!(!PipelineError::ConnectionLost("reset".into()).is_fatal());
        assert!(!PipelineError::MalformedMessage("bad".into()).is_fatal());
        assert!(!PipelineError::AcknowledgementTimeout(Duration::from_secs(1)).is_fatal());
    }
}
