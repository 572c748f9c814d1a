//! orchestrate - run lock-step capture bursts across sensor controllers
//!
//! ```text
//! orchestrate <config_path> <n_bursts> <burst_seconds>
//!     [--shell_output 0|1] [--starting_chunk_number N] [--startup_delay_seconds N]
//! ```
//!
//! Exit status: 0 all bursts completed, 1 interrupted or gave up after
//! crashes, 2 bad configuration, 3 controllers never became ready together.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lockconf::{LockConfig, Registry};
use lockstep::burst_log::default_log_path;
use lockstep::state::StateCell;
use lockstep::{exit_code, telemetry, BurstLog, OrchestratorError, OsBackend, StdioMode, Supervisor};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "orchestrate")]
#[command(about = "Start and stop sensor controllers in lock-step bursts")]
#[command(version)]
struct Cli {
    /// Experiment config: experiment name line, then one controller command per line
    config_path: PathBuf,

    /// Number of bursts to record
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    n_bursts: u32,

    /// Length of each burst in seconds
    burst_seconds: f64,

    /// Show controller output in this terminal (1) or discard it (0)
    #[arg(long = "shell_output", default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    shell_output: u8,

    /// Number given to the first burst
    #[arg(long = "starting_chunk_number", default_value_t = 0)]
    starting_chunk_number: u32,

    /// Seconds to wait before the first launch
    #[arg(long = "startup_delay_seconds", default_value_t = 0.0)]
    startup_delay_seconds: f64,

    /// Settings file (replaces ./lockstep.toml; must exist)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Burst log path (default: <log_dir>/<experiment>_bursts.jsonl)
    #[arg(long = "log_path")]
    log_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("orchestrate: {:#}", e);
            ExitCode::from(exit_code::CONFIG)
        }
    }
}

fn seconds(name: &str, value: f64, allow_zero: bool) -> Result<Duration, OrchestratorError> {
    let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if !ok {
        return Err(OrchestratorError::InvalidArgument(format!(
            "{} must be a {} number of seconds, got {}",
            name,
            if allow_zero { "non-negative" } else { "positive" },
            value
        )));
    }
    Ok(Duration::from_secs_f64(value))
}

async fn run(cli: Cli) -> Result<u8> {
    let burst_duration = seconds("burst_seconds", cli.burst_seconds, false)?;
    let startup_delay = seconds("startup_delay_seconds", cli.startup_delay_seconds, true)?;

    let settings = LockConfig::load_from(cli.settings.as_deref()).map_err(OrchestratorError::from)?;
    telemetry::init(&settings.telemetry.log_level)?;

    let registry = Registry::load(&cli.config_path).map_err(OrchestratorError::from)?;
    let plan = settings.signals.plan().map_err(OrchestratorError::from)?;

    let log_path = cli
        .log_path
        .clone()
        .unwrap_or_else(|| default_log_path(&settings.paths.log_dir, registry.experiment_name()));
    let log = BurstLog::open(&log_path).map_err(OrchestratorError::from)?;
    info!(log = %log_path.display(), "burst log");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let backend = OsBackend::install(
        plan,
        StdioMode::from_flag(cli.shell_output == 1),
        settings.paths.ready_socket(std::process::id()),
        events_tx,
    )
    .map_err(OrchestratorError::ReadySocket)?;

    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(Arc::new(backend), events_rx, registry, &settings, log)
        .with_first_burst(cli.starting_chunk_number)
        .with_cancel(cancel.clone());
    spawn_interrupt_listener(cancel.clone(), supervisor.state())
        .context("failed to install interrupt handlers")?;

    if !startup_delay.is_zero() {
        info!(secs = startup_delay.as_secs_f64(), "startup delay");
        tokio::select! {
            _ = cancel.cancelled() => {
                eprintln!("interrupted before launch");
                return Ok(exit_code::FAILED);
            }
            _ = tokio::time::sleep(startup_delay) => {}
        }
    }

    let summary = supervisor.run(cli.n_bursts, burst_duration).await;
    println!("{}", summary.message());
    Ok(summary.exit_code())
}

/// First SIGINT/SIGTERM cancels the run; the loop then stops controllers.
fn spawn_interrupt_listener(cancel: CancellationToken, state: Arc<StateCell>) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            if cancel.is_cancelled() {
                warn!(signal = name, "already stopping");
            } else {
                warn!(signal = name, state = %state.get(), "interrupt received, stopping controllers");
                cancel.cancel();
            }
        }
    });
    Ok(())
}
