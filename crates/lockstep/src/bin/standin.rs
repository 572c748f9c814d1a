//! standin - a controller that speaks the lockstep protocol without hardware
//!
//! Useful for rehearsing an experiment config and for end-to-end tests:
//!
//! ```text
//! /path/to/standin Camera_com.py 2.5 --burst {burst} --is_subprocess 1 --parent_pid {parent_pid}
//! ```
//!
//! It reports READY on the ready socket named in `LOCKSTEP_READY_SOCKET`,
//! "captures" for `duration` seconds on each GO, reports READY again, and
//! exits cleanly on STOP.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lockconf::LockConfig;
use lockproto::READY_SOCKET_ENV;
use lockstep::{telemetry, ReadyReporter};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "standin")]
#[command(about = "Stand-in sensor controller for rehearsing lockstep runs")]
struct Args {
    /// Controller script this process stands in for (e.g. Camera_com.py)
    label: String,

    /// Seconds spent capturing after each GO
    duration: f64,

    /// Burst token from the launch command
    #[arg(long)]
    burst: Option<String>,

    #[arg(long = "is_subprocess", default_value_t = 0)]
    is_subprocess: u8,

    #[arg(long = "parent_pid", default_value_t = 0)]
    parent_pid: i32,

    /// Delay before each READY, in milliseconds
    #[arg(long = "ready_delay_ms", default_value_t = 0)]
    ready_delay_ms: u64,

    /// Never report READY
    #[arg(long = "never_ready")]
    never_ready: bool,

    /// Exit with status 3 after this many bursts
    #[arg(long = "exit_after_bursts")]
    exit_after_bursts: Option<u32>,
}

const CRASH_STATUS: i32 = 3;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = LockConfig::load().context("failed to load settings")?;
    telemetry::init(&settings.telemetry.log_level)?;
    let plan = settings
        .signals
        .plan()
        .context("invalid signal settings")?;

    let capture = Duration::from_secs_f64(args.duration.max(0.0));
    let ready_delay = Duration::from_millis(args.ready_delay_ms);
    let label = args.label.as_str();
    let burst = args.burst.as_deref().unwrap_or("-");

    if args.is_subprocess != 1 || args.parent_pid <= 0 {
        info!(label, burst, "standalone: capturing once");
        tokio::time::sleep(capture).await;
        return Ok(());
    }
    let socket = std::env::var_os(READY_SOCKET_ENV)
        .with_context(|| format!("{} is not set", READY_SOCKET_ENV))?;

    // Handlers go in before the first READY so an immediate GO is not lost
    let mut go = signal(SignalKind::from_raw(plan.go as i32))?;
    let mut stop = signal(SignalKind::from_raw(plan.stop as i32))?;
    let mut reporter = ReadyReporter::connect(Path::new(&socket), std::process::id()).await?;

    tokio::time::sleep(ready_delay).await;
    announce_ready(&mut reporter, args.never_ready).await;

    let mut captured = 0u32;
    loop {
        tokio::select! {
            _ = stop.recv() => {
                info!(label, burst, captured, "STOP received");
                return Ok(());
            }
            _ = go.recv() => {
                captured += 1;
                info!(label, burst, captured, "GO received, capturing");
                tokio::time::sleep(capture).await;

                if args.exit_after_bursts == Some(captured) {
                    warn!(label, captured, "exiting as instructed");
                    std::process::exit(CRASH_STATUS);
                }

                tokio::time::sleep(ready_delay).await;
                announce_ready(&mut reporter, args.never_ready).await;
            }
        }
    }
}

async fn announce_ready(reporter: &mut ReadyReporter, suppressed: bool) {
    if suppressed {
        return;
    }
    if let Err(e) = reporter.ready().await {
        warn!(error = %e, "failed to report READY");
    }
}
