//! Real child processes driven over OS signals.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use lockproto::{Directive, ExitReport, SignalPlan, READY_SOCKET_ENV};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, warn};

use super::ready::ReadyListener;
use super::{Backend, ChildHandle, EventSender, LaunchRequest};
use crate::error::{DeliveryError, LaunchError, SchedError};
use crate::sched;

/// Where controller stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    Inherit,
    Null,
}

impl StdioMode {
    pub fn from_flag(shell_output: bool) -> Self {
        if shell_output {
            StdioMode::Inherit
        } else {
            StdioMode::Null
        }
    }

    fn stdio(&self) -> Stdio {
        match self {
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Null => Stdio::null(),
        }
    }
}

/// Spawns controllers as child processes.
///
/// GO and STOP go out as signals per the [`SignalPlan`]. READY comes back on
/// the ready socket, whose path every child finds in `LOCKSTEP_READY_SOCKET`.
pub struct OsBackend {
    plan: SignalPlan,
    stdio: StdioMode,
    events: EventSender,
    ready: ReadyListener,
}

impl OsBackend {
    /// Bind the ready socket at `ready_socket` and build the backend.
    ///
    /// Must run inside a tokio runtime and before the first spawn.
    pub fn install(
        plan: SignalPlan,
        stdio: StdioMode,
        ready_socket: impl Into<PathBuf>,
        events: EventSender,
    ) -> std::io::Result<Self> {
        let ready = ReadyListener::bind(ready_socket, events.clone())?;
        debug!(go = plan.go.as_str(), stop = plan.stop.as_str(), "signal plan");

        Ok(Self {
            plan,
            stdio,
            events,
            ready,
        })
    }

    pub fn plan(&self) -> &SignalPlan {
        &self.plan
    }

    pub fn ready_socket(&self) -> &std::path::Path {
        self.ready.path()
    }
}

impl Backend for OsBackend {
    fn spawn(&self, request: &LaunchRequest) -> Result<ChildHandle, LaunchError> {
        let kind = request.kind;
        let (program, args) = request
            .argv
            .split_first()
            .ok_or(LaunchError::EmptyCommand { kind })?;

        let mut child = Command::new(program)
            .args(args)
            .env(READY_SOCKET_ENV, self.ready.path())
            .stdin(Stdio::null())
            .stdout(self.stdio.stdio())
            .stderr(self.stdio.stdio())
            // Own process group: a Ctrl-C at the terminal reaches only us,
            // and we decide how children stop.
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                kind,
                message: e.to_string(),
            })?;

        let pid = child.id().ok_or_else(|| LaunchError::Spawn {
            kind,
            message: "process exited before its pid was read".to_string(),
        })?;

        let (handle, notifier, kill_rx) = ChildHandle::pair(pid, self.events.clone());

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid, error = %e, "kill failed");
                    }
                    child.wait().await
                }
            };
            let report = match status {
                Ok(status) => ExitReport::new(pid, status.code(), status.signal()),
                Err(e) => {
                    warn!(pid, error = %e, "failed to reap controller");
                    ExitReport::new(pid, None, None)
                }
            };
            debug!(%report, "controller exited");
            notifier.notify(report);
        });

        Ok(handle)
    }

    fn deliver(&self, pid: u32, directive: Directive) -> Result<(), DeliveryError> {
        let sig = self.plan.signal_for(directive);
        kill(Pid::from_raw(pid as i32), sig).map_err(|e| match e {
            Errno::ESRCH => DeliveryError::NotRunning { pid },
            other => DeliveryError::Failed {
                pid,
                directive,
                message: other.to_string(),
            },
        })
    }

    fn pin_to_core(&self, pid: u32, core: usize) -> Result<(), SchedError> {
        sched::pin_to_core(pid, core)
    }

    fn elevate_priority(&self, pid: u32, nice: i32) -> Result<i32, SchedError> {
        sched::elevate_priority(pid, nice)
    }

    fn available_cores(&self) -> usize {
        sched::available_cores()
    }
}
