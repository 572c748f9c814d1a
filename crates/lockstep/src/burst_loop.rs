//! Burst loop controller.
//!
//! Drives one launch attempt through the state machine:
//!
//! ```text
//! LAUNCHING -> AWAITING_READY -> BROADCASTING_GO -> BURST_ACTIVE
//!                                      ^                 |
//!                                      |                 v
//!                                AWAITING_NEXT_READY <---+   (bursts remain)
//!                                                        |
//!                                   STOPPING <-----------+   (last burst, timeout,
//!                                      |                      crash, interrupt)
//!                                      v
//!                                  TERMINATED
//! ```
//!
//! A burst counts as complete once its duration has elapsed and, unless it
//! is the last one, every controller has reported READY again. Completed
//! bursts are appended to the burst log before the next GO.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lockconf::{ControllerKind, LaunchMode, Registry, TimingConfig};
use lockproto::{spread, BurstToken, ExitReport, ReadyStamp};
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::barrier::ReadinessBarrier;
use crate::broadcast::{Broadcaster, GoStamp};
use crate::burst_log::{BurstLog, BurstRecord, LogEntry};
use crate::error::BarrierError;
use crate::launcher::{LaunchedGroup, Launcher};
use crate::state::{OrchestratorState, StateCell};

/// Why an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEnd {
    Completed,
    LaunchFailed(String),
    ReadinessTimeout { observed: usize, expected: usize },
    ChildExited {
        kind: ControllerKind,
        report: ExitReport,
    },
    Interrupted,
    LogFailed(String),
}

impl LoopEnd {
    pub fn is_completed(&self) -> bool {
        matches!(self, LoopEnd::Completed)
    }
}

impl std::fmt::Display for LoopEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopEnd::Completed => write!(f, "completed"),
            LoopEnd::LaunchFailed(msg) => write!(f, "launch failed: {}", msg),
            LoopEnd::ReadinessTimeout { observed, expected } => {
                write!(f, "readiness timeout ({}/{} ready)", observed, expected)
            }
            LoopEnd::ChildExited { kind, report } => write!(f, "{} ({})", kind, report),
            LoopEnd::Interrupted => write!(f, "interrupted"),
            LoopEnd::LogFailed(msg) => write!(f, "burst log failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub completed: u32,
    /// True once any readiness barrier released during this attempt.
    pub coordinated: bool,
    pub end: LoopEnd,
}

/// One attempt's work order.
#[derive(Debug, Clone, Copy)]
pub struct AttemptPlan {
    pub attempt: u32,
    /// Number given to the first burst of this attempt.
    pub first_burst: u32,
    pub bursts: u32,
    pub burst_duration: Duration,
}

/// Everything the loop drives, kept by the supervisor across attempts.
pub struct LoopContext {
    pub registry: Registry,
    pub launcher: Launcher,
    pub broadcaster: Broadcaster,
    pub barrier: Arc<ReadinessBarrier>,
    pub exits: mpsc::UnboundedReceiver<ExitReport>,
    pub log: BurstLog,
    pub state: Arc<StateCell>,
    pub cancel: CancellationToken,
    pub timing: TimingConfig,
    pub launch_mode: LaunchMode,
    pub run_id: Uuid,
}

pub struct BurstLoop<'a> {
    ctx: &'a mut LoopContext,
    plan: AttemptPlan,
    completed: u32,
    coordinated: bool,
}

impl<'a> BurstLoop<'a> {
    pub fn new(ctx: &'a mut LoopContext, plan: AttemptPlan) -> Self {
        Self {
            ctx,
            plan,
            completed: 0,
            coordinated: false,
        }
    }

    pub async fn run(mut self) -> LoopOutcome {
        let end = if self.plan.bursts == 0 {
            LoopEnd::Completed
        } else {
            match self.ctx.launch_mode {
                LaunchMode::Persistent => self.run_persistent().await,
                LaunchMode::PerBurst => self.run_per_burst().await,
            }
        };
        self.ctx.state.transition(OrchestratorState::Terminated);
        LoopOutcome {
            completed: self.completed,
            coordinated: self.coordinated,
            end,
        }
    }

    /// Launch once, then GO/READY cycles until every burst is done.
    async fn run_persistent(&mut self) -> LoopEnd {
        let mut group = match self.launch(BurstToken::Neutral).await {
            Ok(group) => group,
            Err(end) => return end,
        };
        let result = self.cycle_persistent(&group).await;
        self.shutdown(&mut group).await;
        match result {
            Ok(()) => LoopEnd::Completed,
            Err(end) => end,
        }
    }

    async fn cycle_persistent(&mut self, group: &LaunchedGroup) -> Result<(), LoopEnd> {
        self.ctx.state.transition(OrchestratorState::AwaitingReady);
        let mut ready = self.await_barrier(group).await?;
        let mut burst = self.plan.first_burst;

        loop {
            let go = self.go(group, burst);
            let burst_end = go.instant + self.plan.burst_duration;
            self.guard(group, false, sleep_until(burst_end)).await?;

            if self.completed + 1 >= self.plan.bursts {
                return self.complete(burst, ready, &go);
            }

            self.ctx.state.transition(OrchestratorState::AwaitingNextReady);
            let next = self.await_barrier(group).await?;
            self.complete(burst, ready, &go)?;
            ready = next;
            burst += 1;
        }
    }

    /// Fresh launch for every burst, with the burst number in each command.
    async fn run_per_burst(&mut self) -> LoopEnd {
        for index in 0..self.plan.bursts {
            let burst = self.plan.first_burst + index;
            let mut group = match self.launch(BurstToken::Number(burst)).await {
                Ok(group) => group,
                Err(end) => return end,
            };
            let result = self.single_burst(&group, burst).await;
            self.shutdown(&mut group).await;
            if let Err(end) = result {
                return end;
            }
        }
        LoopEnd::Completed
    }

    async fn single_burst(&mut self, group: &LaunchedGroup, burst: u32) -> Result<(), LoopEnd> {
        self.ctx.state.transition(OrchestratorState::AwaitingReady);
        let ready = self.await_barrier(group).await?;
        let go = self.go(group, burst);
        let burst_end = go.instant + self.plan.burst_duration;
        // Per-burst controllers may finish their recording and exit on
        // their own before the timer does.
        self.guard(group, true, sleep_until(burst_end)).await?;
        self.complete(burst, ready, &go)
    }

    /// Arm the barrier and start every controller. Whatever started before
    /// a failure is killed without STOP: it never reached a barrier.
    async fn launch(&mut self, burst: BurstToken) -> Result<LaunchedGroup, LoopEnd> {
        self.ctx.state.transition(OrchestratorState::Launching);
        self.ctx.barrier.arm(self.ctx.registry.len());

        match self.ctx.launcher.launch(&self.ctx.registry, burst) {
            Ok(group) => {
                self.ctx.barrier.admit(&group.pids());
                Ok(group)
            }
            Err(mut failure) => {
                error!(error = %failure.error, started = failure.partial.len(), "launch failed");
                self.ctx.state.transition(OrchestratorState::Stopping);
                self.ctx.broadcaster.abort(&mut failure.partial).await;
                Err(LoopEnd::LaunchFailed(failure.error.to_string()))
            }
        }
    }

    async fn await_barrier(&mut self, group: &LaunchedGroup) -> Result<Vec<ReadyStamp>, LoopEnd> {
        let barrier = Arc::clone(&self.ctx.barrier);
        let wait = barrier.await_ready(
            self.ctx.timing.ready_timeout(),
            self.ctx.timing.progress_interval(),
        );

        match self.guard(group, false, wait).await? {
            Ok(stamps) => {
                self.coordinated = true;
                Ok(stamps)
            }
            Err(BarrierError::Timeout {
                observed,
                expected,
                waited,
            }) => {
                error!(
                    observed,
                    expected,
                    waited_secs = waited.as_secs_f64(),
                    "readiness timeout"
                );
                barrier.reset();
                Err(LoopEnd::ReadinessTimeout { observed, expected })
            }
        }
    }

    fn go(&mut self, group: &LaunchedGroup, burst: u32) -> GoStamp {
        self.ctx.state.transition(OrchestratorState::BroadcastingGo);
        let go = self.ctx.broadcaster.go(group);
        self.ctx.state.transition(OrchestratorState::BurstActive);
        info!(
            burst,
            attempt = self.plan.attempt,
            go_spread_us = ?go.spread_micros,
            "burst active"
        );
        go
    }

    /// Run `fut` to completion unless the run is interrupted or a controller
    /// of `group` exits first. Exits of controllers from earlier launches
    /// are drained and ignored.
    async fn guard<F: Future>(
        &mut self,
        group: &LaunchedGroup,
        tolerate_clean_exit: bool,
        fut: F,
    ) -> Result<F::Output, LoopEnd> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;

                _ = self.ctx.cancel.cancelled() => {
                    warn!(state = %self.ctx.state.get(), "interrupted");
                    return Err(LoopEnd::Interrupted);
                }
                Some(report) = self.ctx.exits.recv() => {
                    match group.kind_of(report.pid) {
                        Some(kind) if tolerate_clean_exit && report.is_clean() => {
                            info!(controller = %kind, %report, "controller finished its burst");
                        }
                        Some(kind) => {
                            error!(controller = %kind, %report, "controller exited unexpectedly");
                            return Err(LoopEnd::ChildExited { kind, report });
                        }
                        None => debug!(pid = report.pid, "exit from an earlier launch"),
                    }
                }
                out = &mut fut => return Ok(out),
            }
        }
    }

    fn complete(&mut self, burst: u32, ready: Vec<ReadyStamp>, go: &GoStamp) -> Result<(), LoopEnd> {
        let ready_spread_us = spread(ready.iter().map(|s| &s.at));
        let record = BurstRecord {
            run_id: self.ctx.run_id,
            attempt: self.plan.attempt,
            burst,
            ready,
            ready_spread_us,
            go_at: go.at,
            go_spread_us: go.spread_micros,
            completed_at: Utc::now(),
        };
        if let Err(e) = self.ctx.log.append(&LogEntry::Burst(record)) {
            error!(burst, error = %e, "failed to record burst");
            return Err(LoopEnd::LogFailed(e.to_string()));
        }
        self.completed += 1;
        info!(
            burst,
            completed = self.completed,
            of = self.plan.bursts,
            "burst complete"
        );
        Ok(())
    }

    async fn shutdown(&mut self, group: &mut LaunchedGroup) {
        self.ctx.state.transition(OrchestratorState::Stopping);
        self.ctx
            .broadcaster
            .stop(group, self.ctx.timing.stop_grace())
            .await;
    }
}
