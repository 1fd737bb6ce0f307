//! # tw-core
//!
//! Core crate for the tickwire pipeline, providing:
//!
//! - **Types** (`types`): fixed-size symbols, price/sentiment ticks, orders
//! - **Shared price book** (`book`): lock-protected price slots over mmap
//! - **Wire codec** (`wire`): length-prefixed frames for every TCP endpoint
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific `PipelineError` via thiserror
//! - **Service lifecycle** (`service`): start/stop trait + fatal reporting
//! - **Latency** (`latency`): histogram of tick age at consumption time
//! - **Time utilities** (`time_util`): microsecond timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod book;
pub mod config;
pub mod error;
pub mod latency;
pub mod logging;
pub mod service;
pub mod time_util;
pub mod types;
pub mod wire;

pub use error::PipelineError;
// Re-export types at crate root for convenience.
pub use types::*;
