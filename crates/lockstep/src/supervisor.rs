//! Crash recovery supervisor.
//!
//! Runs burst-loop attempts until the requested number of bursts is done.
//! An attempt that ends in a launch failure, a crash or a readiness timeout
//! is retried with the remaining bursts after a cooldown, up to
//! `max_restarts`; burst numbering continues where the failed attempt left
//! off. The one exception is a readiness timeout before any barrier of the
//! run has released: the controllers never became ready together, which
//! points at the experiment config, so it is not retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lockconf::{LockConfig, Registry};
use lockproto::ControllerEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::barrier::{spawn_event_pump, ReadinessBarrier};
use crate::broadcast::Broadcaster;
use crate::burst_log::{AttemptRecord, BurstLog, LogEntry, RunRecord};
use crate::burst_loop::{AttemptPlan, BurstLoop, LoopContext, LoopEnd};
use crate::launcher::Launcher;
use crate::state::{OrchestratorState, StateCell};

/// Exit codes of the `orchestrate` binary.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const FAILED: u8 = 1;
    pub const CONFIG: u8 = 2;
    pub const NEVER_COORDINATED: u8 = 3;
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Interrupted,
    /// A readiness barrier timed out before any barrier of the run released.
    NeverCoordinated(LoopEnd),
    /// `max_restarts` reached; carries the last failure.
    RestartsExhausted(LoopEnd),
    LogFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub requested: u32,
    pub completed: u32,
    pub attempts: u32,
    pub end: RunEnd,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.end == RunEnd::Completed
    }

    pub fn exit_code(&self) -> u8 {
        match self.end {
            RunEnd::Completed => exit_code::SUCCESS,
            RunEnd::NeverCoordinated(_) => exit_code::NEVER_COORDINATED,
            RunEnd::Interrupted | RunEnd::RestartsExhausted(_) | RunEnd::LogFailed(_) => {
                exit_code::FAILED
            }
        }
    }

    /// One-line human summary.
    pub fn message(&self) -> String {
        match &self.end {
            RunEnd::Completed => format!("completed {}/{} bursts", self.completed, self.requested),
            RunEnd::Interrupted => format!(
                "interrupted after {}/{} bursts",
                self.completed, self.requested
            ),
            RunEnd::NeverCoordinated(end) => format!(
                "completed {}/{} bursts; controllers never became ready together ({}), check the experiment config",
                self.completed, self.requested, end
            ),
            RunEnd::RestartsExhausted(end) => format!(
                "crashed after {}/{} bursts, restart limit reached ({})",
                self.completed, self.requested, end
            ),
            RunEnd::LogFailed(msg) => format!(
                "stopped after {}/{} bursts: {}",
                self.completed, self.requested, msg
            ),
        }
    }
}

pub struct Supervisor {
    ctx: LoopContext,
    pump: JoinHandle<()>,
    cooldown: Duration,
    max_restarts: u32,
    first_burst: u32,
}

impl Supervisor {
    /// Wire a backend to a new supervisor.
    ///
    /// `events` must be the receiving end of the channel the backend was
    /// built with. Must be called within a tokio runtime.
    pub fn new(
        backend: Arc<dyn Backend>,
        events: mpsc::UnboundedReceiver<ControllerEvent>,
        registry: Registry,
        settings: &LockConfig,
        log: BurstLog,
    ) -> Self {
        let barrier = Arc::new(ReadinessBarrier::new());
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let pump = spawn_event_pump(events, Arc::clone(&barrier), exits_tx);

        let ctx = LoopContext {
            registry,
            launcher: Launcher::new(
                Arc::clone(&backend),
                settings.scheduling.clone(),
                std::process::id(),
            ),
            broadcaster: Broadcaster::new(backend),
            barrier,
            exits: exits_rx,
            log,
            state: Arc::new(StateCell::new()),
            cancel: CancellationToken::new(),
            timing: settings.timing.clone(),
            launch_mode: settings.run.launch_mode,
            run_id: Uuid::new_v4(),
        };

        Self {
            ctx,
            pump,
            cooldown: settings.timing.restart_cooldown(),
            max_restarts: settings.run.max_restarts,
            first_burst: 0,
        }
    }

    /// Number the first burst `n` instead of 0.
    pub fn with_first_burst(mut self, n: u32) -> Self {
        self.first_burst = n;
        self
    }

    /// Cancelling `token` interrupts the run.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id
    }

    /// Shared view of the current state, for interrupt reporting.
    pub fn state(&self) -> Arc<StateCell> {
        Arc::clone(&self.ctx.state)
    }

    /// Run `requested` bursts of `burst_duration` each.
    pub async fn run(mut self, requested: u32, burst_duration: Duration) -> RunSummary {
        let mut completed = 0u32;
        let mut attempts = 0u32;
        let mut restarts = 0u32;
        let mut coordinated = false;

        info!(
            run_id = %self.ctx.run_id,
            experiment = self.ctx.registry.experiment(),
            controllers = self.ctx.registry.len(),
            bursts = requested,
            burst_secs = burst_duration.as_secs_f64(),
            "starting run"
        );

        let end = loop {
            attempts += 1;
            let plan = AttemptPlan {
                attempt: attempts,
                first_burst: self.first_burst + completed,
                bursts: requested - completed,
                burst_duration,
            };
            let outcome = BurstLoop::new(&mut self.ctx, plan).run().await;
            completed += outcome.completed;
            coordinated |= outcome.coordinated;

            let record = AttemptRecord {
                run_id: self.ctx.run_id,
                attempt: attempts,
                completed: outcome.completed,
                requested: plan.bursts,
                crashed: !matches!(outcome.end, LoopEnd::Completed | LoopEnd::Interrupted),
                reason: outcome.end.to_string(),
                at: Utc::now(),
            };
            if let Err(e) = self.ctx.log.append(&LogEntry::Attempt(record)) {
                error!(error = %e, "failed to record attempt");
                break RunEnd::LogFailed(e.to_string());
            }

            match outcome.end {
                LoopEnd::Completed => break RunEnd::Completed,
                LoopEnd::Interrupted => break RunEnd::Interrupted,
                LoopEnd::LogFailed(msg) => break RunEnd::LogFailed(msg),
                end @ LoopEnd::ReadinessTimeout { .. } if !coordinated => {
                    error!(reason = %end, "controllers never became ready together, not restarting");
                    break RunEnd::NeverCoordinated(end);
                }
                end => {
                    warn!(
                        reason = %end,
                        "attempt failed after {}/{} bursts, restarting",
                        completed, requested
                    );
                    if self.max_restarts > 0 && restarts >= self.max_restarts {
                        error!(restarts, "restart limit reached");
                        break RunEnd::RestartsExhausted(end);
                    }
                    restarts += 1;

                    tokio::select! {
                        _ = self.ctx.cancel.cancelled() => break RunEnd::Interrupted,
                        _ = tokio::time::sleep(self.cooldown) => {}
                    }
                }
            }
        };

        let summary = RunSummary {
            run_id: self.ctx.run_id,
            requested,
            completed,
            attempts,
            end,
        };

        let record = RunRecord {
            run_id: summary.run_id,
            requested,
            completed,
            attempts,
            outcome: summary.message(),
            exit_code: summary.exit_code(),
            at: Utc::now(),
        };
        if let Err(e) = self.ctx.log.append(&LogEntry::Run(record)) {
            error!(error = %e, "failed to record run summary");
        }

        self.ctx.state.transition(OrchestratorState::Terminated);
        self.pump.abort();
        info!(attempts, "{}", summary.message());
        summary
    }
}
