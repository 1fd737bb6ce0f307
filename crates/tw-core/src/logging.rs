//! Logging initialization using the `tracing` ecosystem.
//!
//! Every role logs through the same setup:
//! - Console output (human-readable, ANSI colours)
//! - Optional file output (daily rotation via `tracing-appender`)
//! - Level from `RUST_LOG` when set, otherwise the level passed in

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Call once at process start. Fails if a global subscriber is already set.
///
/// - `log_level`: default filter if `RUST_LOG` is unset (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `file_prefix`: log file name prefix, one per role (e.g. `"relay"`)
pub fn init_logging(log_level: &str, log_dir: Option<&Path>, file_prefix: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    let console_layer = fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, file_prefix);
            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);

            tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).try_init()?;
        }
        None => {
            tracing_subscriber::registry().with(env_filter).with(console_layer).try_init()?;
        }
    }
    Ok(())
}
