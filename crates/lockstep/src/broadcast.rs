//! GO and STOP broadcasts to a launched group.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lockconf::ControllerKind;
use lockproto::{spread, Directive, ExitReport};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::DeliveryError;
use crate::launcher::LaunchedGroup;

/// How long to wait for a killed process to be reaped.
const KILL_REAP: Duration = Duration::from_secs(2);

/// Completion of one GO broadcast.
#[derive(Debug, Clone)]
pub struct GoStamp {
    /// Wall-clock time the last delivery completed.
    pub at: DateTime<Utc>,
    /// Monotonic time of the same moment; burst timers start here.
    pub instant: Instant,
    pub delivered: usize,
    /// Spread between first and last delivery, in microseconds.
    pub spread_micros: Option<i64>,
}

/// What happened to one controller during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited on its own before STOP went out.
    AlreadyExited(ExitReport),
    /// Exited within the grace period.
    Exited(ExitReport),
    /// Outlived the grace period and was killed.
    Forced(Option<ExitReport>),
    /// Exit monitor disappeared without a report.
    Lost,
}

#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub outcomes: Vec<(ControllerKind, u32, StopOutcome)>,
}

impl StopReport {
    pub fn forced(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, _, o)| matches!(o, StopOutcome::Forced(_)))
            .count()
    }
}

pub struct Broadcaster {
    backend: Arc<dyn Backend>,
}

impl Broadcaster {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Deliver GO to every controller, back to back in registry order.
    pub fn go(&self, group: &LaunchedGroup) -> GoStamp {
        let mut sent = Vec::with_capacity(group.len());
        for process in group.iter() {
            match self.backend.deliver(process.pid, Directive::Go) {
                Ok(()) => sent.push(Utc::now()),
                Err(e) => warn!(controller = %process.kind, error = %e, "GO not delivered"),
            }
        }
        let stamp = GoStamp {
            at: Utc::now(),
            instant: Instant::now(),
            delivered: sent.len(),
            spread_micros: spread(&sent),
        };
        debug!(
            delivered = stamp.delivered,
            spread_us = ?stamp.spread_micros,
            "GO broadcast"
        );
        stamp
    }

    /// Deliver STOP to every controller that has not had one, then wait for
    /// all of them until one shared deadline. Stragglers are killed.
    pub async fn stop(&self, group: &mut LaunchedGroup, grace: Duration) -> StopReport {
        let mut report = StopReport::default();
        let mut pending = Vec::new();

        for process in group.iter_mut() {
            if process.stop_sent {
                continue;
            }
            process.stop_sent = true;
            if let Some(exit) = process.handle.exit_report() {
                report.outcomes.push((
                    process.kind,
                    process.pid,
                    StopOutcome::AlreadyExited(exit),
                ));
                continue;
            }
            match self.backend.deliver(process.pid, Directive::Stop) {
                Ok(()) | Err(DeliveryError::NotRunning { .. }) => {}
                Err(e) => warn!(controller = %process.kind, error = %e, "STOP not delivered"),
            }
            pending.push(process.pid);
        }

        let deadline = Instant::now() + grace;
        for process in group.iter_mut().filter(|p| pending.contains(&p.pid)) {
            let outcome = match timeout_at(deadline, process.handle.wait_exit()).await {
                Ok(Some(exit)) => StopOutcome::Exited(exit),
                Ok(None) => StopOutcome::Lost,
                Err(_) => {
                    warn!(
                        controller = %process.kind,
                        pid = process.pid,
                        grace_secs = grace.as_secs_f64(),
                        "ShutdownTimeout: controller ignored STOP, killing"
                    );
                    process.handle.force_kill();
                    StopOutcome::Forced(process.handle.wait_exit_for(KILL_REAP).await)
                }
            };
            report.outcomes.push((process.kind, process.pid, outcome));
        }

        info!(
            stopped = report.outcomes.len(),
            forced = report.forced(),
            "controllers stopped"
        );
        report
    }

    /// Kill every controller without sending STOP.
    ///
    /// For groups that never reached a readiness barrier.
    pub async fn abort(&self, group: &mut LaunchedGroup) {
        for process in group.iter_mut() {
            if !process.handle.has_exited() {
                process.handle.force_kill();
            }
        }
        for process in group.iter_mut() {
            if process.handle.wait_exit_for(KILL_REAP).await.is_none() {
                warn!(controller = %process.kind, pid = process.pid, "no exit after kill");
            }
        }
    }
}
