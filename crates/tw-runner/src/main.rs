//! # tw-runner
//!
//! Entry point for every tickwire process.
//!
//! Each pipeline role runs as its own process, selected by subcommand. All
//! roles read the same JSON configuration; `launch` starts the four roles as
//! child processes of one supervisor.
//!
//! # Usage
//!
//! ```bash
//! tw-runner source   --config tickwire.json
//! tw-runner relay    --config tickwire.json --log-dir /var/log/tickwire
//! tw-runner decision --config tickwire.json --log-level debug
//! tw-runner intake   --config tickwire.json
//! tw-runner launch   --config tickwire.json
//! ```
//!
//! A role exits non-zero when one of its components reports a fatal error.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};
use tw_core::config::{PipelineConfig, load_config};
use tw_core::service::{Service, fatal_channel};
use tw_feed::relay::PriceRelay;
use tw_feed::source::PriceNewsSource;
use tw_trade::decision::DecisionEngine;
use tw_trade::intake::OrderIntake;

/// Delay between child starts so upstream endpoints are usually up first.
const LAUNCH_STAGGER: Duration = Duration::from_millis(300);
/// How long `launch` waits for children to exit after Ctrl+C.
const CHILD_GRACE: Duration = Duration::from_secs(5);

/// tickwire pipeline runner.
#[derive(Parser)]
#[command(name = "tw-runner", about = "tickwire price/news/order pipeline")]
struct Cli {
    #[command(subcommand)]
    role: Role,

    /// Configuration file path (JSON). Built-in defaults when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Optional log directory for file output. Overrides `logging.log_path`.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Generate and broadcast price and sentiment ticks.
    Source,
    /// Copy the price stream into the shared price book.
    Relay,
    /// Trade on sentiment ticks against the price book.
    Decision,
    /// Accept, log and acknowledge orders.
    Intake,
    /// Start all four roles as child processes.
    Launch,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Relay => "relay",
            Self::Decision => "decision",
            Self::Intake => "intake",
            Self::Launch => "launch",
        }
    }
}

fn build_service(role: Role, config: &PipelineConfig) -> Option<Box<dyn Service>> {
    match role {
        Role::Source => Some(Box::new(PriceNewsSource::new(config))),
        Role::Relay => Some(Box::new(PriceRelay::new(config))),
        Role::Decision => Some(Box::new(DecisionEngine::new(config))),
        Role::Intake => Some(Box::new(OrderIntake::new(config))),
        Role::Launch => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration (needed first: it may name the log directory)
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    // 2. Logging
    let log_dir = cli.log_dir.clone().or_else(|| config.logging.log_path.clone());
    let prefix = format!("{}-{}", config.logging.module_name, cli.role.as_str());
    tw_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &prefix)?;

    info!(
        "tw-runner {} starting, config={}, log_level={}, symbols={:?}",
        cli.role.as_str(),
        cli.config.as_ref().map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string()),
        cli.log_level,
        config.symbols
    );

    // 3. Run
    match build_service(cli.role, &config) {
        Some(service) => run_service(service).await,
        None => launch(&cli).await,
    }
}

/// Start one service and keep it running until Ctrl+C or a fatal report.
async fn run_service(mut service: Box<dyn Service>) -> Result<()> {
    let name = service.name().to_string();
    let (fatal_tx, mut fatal_rx) = fatal_channel();

    service.start(fatal_tx).await.map_err(|e| anyhow!("[{name}] startup failed: {e:#}"))?;
    info!("[{name}] started, press Ctrl+C to stop");

    let fatal = tokio::select! {
        sig = tokio::signal::ctrl_c() => {
            sig?;
            info!("[{name}] shutdown signal received");
            None
        }
        Some(fatal) = fatal_rx.recv() => Some(fatal),
    };

    if let Err(e) = service.stop().await {
        error!("[{name}] error while stopping: {e:#}");
    }

    match fatal {
        Some(fatal) => bail!("{fatal}"),
        None => {
            info!("[{name}] stopped cleanly");
            Ok(())
        }
    }
}

/// Supervise all four roles as child processes of this binary.
async fn launch(cli: &Cli) -> Result<()> {
    let exe = std::env::current_exe()?;
    let mut children: Vec<(Role, Child)> = Vec::new();

    // Downstream first: intake before decision, source before relay.
    for role in [Role::Intake, Role::Source, Role::Relay, Role::Decision] {
        let mut cmd = Command::new(&exe);
        cmd.arg(role.as_str()).arg("--log-level").arg(&cli.log_level).kill_on_drop(true);
        if let Some(config) = &cli.config {
            cmd.arg("--config").arg(config);
        }
        if let Some(dir) = &cli.log_dir {
            cmd.arg("--log-dir").arg(dir);
        }
        let child = cmd.spawn()?;
        info!("[launch] {} started (pid {})", role.as_str(), child.id().unwrap_or_default());
        children.push((role, child));
        tokio::time::sleep(LAUNCH_STAGGER).await;
    }
    info!("[launch] all roles running, press Ctrl+C to stop");

    let failed = loop {
        tokio::select! {
            sig = tokio::signal::ctrl_c() => {
                sig?;
                info!("[launch] shutdown signal received");
                break None;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
        if let Some(exited) = first_exited(&mut children)? {
            break Some(exited);
        }
    };

    if let Some((role, status)) = &failed {
        error!("[launch] {} exited ({status}), stopping the rest", role.as_str());
        for (_, child) in children.iter_mut() {
            let _ = child.start_kill();
        }
    }

    // Children share our terminal and receive Ctrl+C themselves.
    for (role, child) in children.iter_mut() {
        match tokio::time::timeout(CHILD_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!("[launch] {} exited ({status})", role.as_str()),
            Ok(Err(e)) => warn!("[launch] waiting for {} failed: {e}", role.as_str()),
            Err(_) => {
                warn!("[launch] {} did not stop within {CHILD_GRACE:?}, killing", role.as_str());
                let _ = child.kill().await;
            }
        }
    }

    match failed {
        Some((role, status)) => bail!("{} exited with {status}", role.as_str()),
        None => Ok(()),
    }
}

fn first_exited(children: &mut [(Role, Child)]) -> Result<Option<(Role, ExitStatus)>> {
    for (role, child) in children.iter_mut() {
        if let Some(status) = child.try_wait()? {
            return Ok(Some((*role, status)));
        }
    }
    Ok(None)
}
