//! Process launcher: starts every registered controller in registry order.

use std::sync::Arc;

use lockconf::{ControllerKind, Registry, SchedulingConfig};
use lockproto::BurstToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ChildHandle, LaunchRequest};
use crate::error::LaunchError;

/// One started controller.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub kind: ControllerKind,
    pub pid: u32,
    /// Core it was pinned to, if pinning succeeded.
    pub core: Option<usize>,
    /// Nice value applied, if elevation succeeded.
    pub priority: Option<i32>,
    pub(crate) handle: ChildHandle,
    pub(crate) stop_sent: bool,
}

impl LaunchedProcess {
    pub fn has_exited(&self) -> bool {
        self.handle.has_exited()
    }
}

/// The controllers of one launch, in registry order.
#[derive(Debug, Default)]
pub struct LaunchedGroup {
    processes: Vec<LaunchedProcess>,
}

impl LaunchedGroup {
    pub fn iter(&self) -> impl Iterator<Item = &LaunchedProcess> {
        self.processes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut LaunchedProcess> {
        self.processes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().map(|p| p.pid).collect()
    }

    pub fn kind_of(&self, pid: u32) -> Option<ControllerKind> {
        self.processes.iter().find(|p| p.pid == pid).map(|p| p.kind)
    }
}

/// Launch stopped partway; `partial` holds whatever did start.
#[derive(Debug)]
pub struct LaunchFailure {
    pub partial: LaunchedGroup,
    pub error: LaunchError,
}

pub struct Launcher {
    backend: Arc<dyn Backend>,
    scheduling: SchedulingConfig,
    parent_pid: u32,
}

impl Launcher {
    pub fn new(backend: Arc<dyn Backend>, scheduling: SchedulingConfig, parent_pid: u32) -> Self {
        Self {
            backend,
            scheduling,
            parent_pid,
        }
    }

    /// Start every controller with `burst` substituted into its command.
    ///
    /// The readiness barrier must already be armed: a controller may report
    /// READY before this returns.
    pub fn launch(
        &self,
        registry: &Registry,
        burst: BurstToken,
    ) -> Result<LaunchedGroup, LaunchFailure> {
        let cores = self.backend.available_cores().max(1);
        let mut group = LaunchedGroup::default();

        for (index, spec) in registry.specs().iter().enumerate() {
            let request = LaunchRequest {
                kind: spec.kind,
                argv: spec
                    .template
                    .resolve(burst, self.parent_pid, registry.experiment()),
            };
            debug!(controller = %spec.kind, argv = ?request.argv, "spawning");

            let handle = match self.backend.spawn(&request) {
                Ok(handle) => handle,
                Err(error) => {
                    return Err(LaunchFailure {
                        partial: group,
                        error,
                    })
                }
            };
            let pid = handle.pid();

            let core = if self.scheduling.pin_cpus {
                let core = (self.scheduling.first_core + index) % cores;
                match self.backend.pin_to_core(pid, core) {
                    Ok(()) => Some(core),
                    Err(e) => {
                        warn!(controller = %spec.kind, pid, error = %e, "CPU pinning failed");
                        None
                    }
                }
            } else {
                None
            };

            let priority = if self.scheduling.elevate_priority {
                match self.backend.elevate_priority(pid, self.scheduling.nice) {
                    Ok(nice) => Some(nice),
                    Err(e) => {
                        warn!(controller = %spec.kind, pid, error = %e, "priority elevation failed");
                        None
                    }
                }
            } else {
                None
            };

            info!(controller = %spec.kind, pid, ?core, ?priority, "launched");
            group.processes.push(LaunchedProcess {
                kind: spec.kind,
                pid,
                core,
                priority,
                handle,
                stop_sent: false,
            });
        }

        Ok(group)
    }
}
