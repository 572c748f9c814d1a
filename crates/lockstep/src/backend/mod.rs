//! Process backends.
//!
//! A backend starts controller processes, delivers directives to them and
//! reports their READYs and exits on the event channel it was built with.
//! `OsBackend` drives real child processes: directives as OS signals, READY
//! over the ready socket.

mod os;
mod ready;

pub use os::{OsBackend, StdioMode};
pub use ready::{ReadyListener, ReadyReporter};

use std::time::Duration;

use lockconf::ControllerKind;
use lockproto::{ControllerEvent, Directive, ExitReport};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{DeliveryError, LaunchError, SchedError};

pub type EventSender = mpsc::UnboundedSender<ControllerEvent>;

/// A fully resolved controller command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub kind: ControllerKind,
    pub argv: Vec<String>,
}

pub trait Backend: Send + Sync {
    /// Start one controller. Must be called from within a tokio runtime.
    fn spawn(&self, request: &LaunchRequest) -> Result<ChildHandle, LaunchError>;

    fn deliver(&self, pid: u32, directive: Directive) -> Result<(), DeliveryError>;

    fn pin_to_core(&self, pid: u32, core: usize) -> Result<(), SchedError>;

    /// Raise scheduling priority as far as allowed, up to `nice`.
    /// Returns the nice value actually applied.
    fn elevate_priority(&self, pid: u32, nice: i32) -> Result<i32, SchedError>;

    fn available_cores(&self) -> usize;
}

/// Receiving half of a kill request, held by the monitor of one child.
pub type KillRequest = oneshot::Receiver<()>;

/// Orchestrator-side handle to one running controller.
#[derive(Debug)]
pub struct ChildHandle {
    pid: u32,
    exit: watch::Receiver<Option<ExitReport>>,
    kill: Option<oneshot::Sender<()>>,
}

/// Monitor-side half: publishes the exit exactly once.
#[derive(Debug)]
pub struct ExitNotifier {
    exit: watch::Sender<Option<ExitReport>>,
    events: EventSender,
}

impl ExitNotifier {
    pub fn notify(self, report: ExitReport) {
        self.exit.send_replace(Some(report.clone()));
        // The loop may already be gone during shutdown
        let _ = self.events.send(ControllerEvent::Exited(report));
    }
}

impl ChildHandle {
    /// Build a handle plus the pieces its monitor task needs.
    pub fn pair(pid: u32, events: EventSender) -> (ChildHandle, ExitNotifier, KillRequest) {
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        (
            ChildHandle {
                pid,
                exit: exit_rx,
                kill: Some(kill_tx),
            },
            ExitNotifier {
                exit: exit_tx,
                events,
            },
            kill_rx,
        )
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn exit_report(&self) -> Option<ExitReport> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait for the process to end. `None` if its monitor vanished without
    /// reporting.
    pub async fn wait_exit(&mut self) -> Option<ExitReport> {
        match self.exit.wait_for(Option::is_some).await {
            Ok(report) => (*report).clone(),
            Err(_) => None,
        }
    }

    /// Like `wait_exit`, bounded by `limit`.
    pub async fn wait_exit_for(&mut self, limit: Duration) -> Option<ExitReport> {
        tokio::time::timeout(limit, self.wait_exit())
            .await
            .ok()
            .flatten()
    }

    /// Ask the monitor to kill the process. Only the first call does anything.
    pub fn force_kill(&mut self) -> bool {
        match self.kill.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}
