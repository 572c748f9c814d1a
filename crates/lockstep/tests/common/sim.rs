//! Scripted in-process controllers.
//!
//! Each simulated controller is a task that follows the protocol: it reports
//! READY after a delay, captures for a while on GO, reports READY again, and
//! exits on STOP. Behaviors can be made to misbehave (never ready, crash after
//! a number of bursts, ignore STOP, fail to spawn) to drive recovery paths
//! deterministically. Every spawn, delivery and kill is journaled.
//!
//! READYs go straight onto the event channel by default. With
//! [`SimBackend::over_socket`] each controller instead connects to a ready
//! socket and reports the way a real controller process does.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lockconf::ControllerKind;
use lockproto::{ControllerEvent, Directive, ExitReport, ReadyStamp};
use lockstep::backend::{
    Backend, ChildHandle, EventSender, ExitNotifier, KillRequest, LaunchRequest, ReadyReporter,
};
use lockstep::error::{DeliveryError, LaunchError, SchedError};
use tokio::sync::mpsc;
use tokio::time::sleep;

const FIRST_PID: u32 = 10_000;

/// How one simulated controller behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBehavior {
    /// Delay before each READY (after start, and after each capture).
    pub ready_delay: Duration,
    /// Time spent capturing after a GO.
    pub capture: Duration,
    /// Total READYs it will ever send; `None` for unlimited.
    pub ready_limit: Option<u32>,
    /// Exit with status 1 on this GO (1-based).
    pub crash_on_go: Option<u32>,
    /// Exit with status 1 instead of the first READY.
    pub crash_at_start: bool,
    pub ignore_stop: bool,
    pub fail_spawn: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            ready_delay: Duration::from_millis(10),
            capture: Duration::ZERO,
            ready_limit: None,
            crash_on_go: None,
            crash_at_start: false,
            ignore_stop: false,
            fail_spawn: false,
        }
    }
}

impl SimBehavior {
    pub fn never_ready() -> Self {
        Self {
            ready_limit: Some(0),
            ..Self::default()
        }
    }

    pub fn crash_on_go(n: u32) -> Self {
        Self {
            crash_on_go: Some(n),
            ..Self::default()
        }
    }

    pub fn crash_at_start() -> Self {
        Self {
            crash_at_start: true,
            ..Self::default()
        }
    }

    pub fn ignore_stop() -> Self {
        Self {
            ignore_stop: true,
            ..Self::default()
        }
    }

    pub fn fail_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    pub fn with_capture(mut self, capture: Duration) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_ready_limit(mut self, limit: u32) -> Self {
        self.ready_limit = Some(limit);
        self
    }
}

/// Journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimRecord {
    Spawned {
        pid: u32,
        kind: ControllerKind,
        argv: Vec<String>,
    },
    Delivered {
        pid: u32,
        directive: Directive,
    },
    Pinned {
        pid: u32,
        core: usize,
    },
    Elevated {
        pid: u32,
        nice: i32,
    },
    Exited(ExitReport),
}

#[derive(Default)]
struct SimState {
    behaviors: HashMap<ControllerKind, SimBehavior>,
    queued: HashMap<ControllerKind, VecDeque<SimBehavior>>,
    mailboxes: HashMap<u32, mpsc::UnboundedSender<Directive>>,
    kinds: HashMap<u32, ControllerKind>,
    journal: Vec<SimRecord>,
}

pub struct SimBackend {
    events: EventSender,
    ready_socket: Option<PathBuf>,
    state: Arc<Mutex<SimState>>,
    next_pid: AtomicU32,
    cores: usize,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimBackend {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            ready_socket: None,
            state: Arc::new(Mutex::new(SimState::default())),
            next_pid: AtomicU32::new(FIRST_PID),
            cores: 4,
        }
    }

    /// Controllers report READY on the socket at `path` instead of the
    /// event channel. Exits still go to `events`, as from an exit monitor.
    pub fn over_socket(events: EventSender, path: impl Into<PathBuf>) -> Self {
        Self {
            ready_socket: Some(path.into()),
            ..Self::new(events)
        }
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    /// Behavior for every future spawn of `kind`.
    pub fn set_behavior(&self, kind: ControllerKind, behavior: SimBehavior) {
        lock(&self.state).behaviors.insert(kind, behavior);
    }

    /// Behavior for the next spawn of `kind` only. Queued behaviors are used
    /// in order before falling back to the persistent one.
    pub fn queue_behavior(&self, kind: ControllerKind, behavior: SimBehavior) {
        lock(&self.state)
            .queued
            .entry(kind)
            .or_default()
            .push_back(behavior);
    }

    pub fn journal(&self) -> Vec<SimRecord> {
        lock(&self.state).journal.clone()
    }

    /// Every spawned controller, in spawn order.
    pub fn spawned(&self) -> Vec<(u32, ControllerKind)> {
        lock(&self.state)
            .journal
            .iter()
            .filter_map(|r| match r {
                SimRecord::Spawned { pid, kind, .. } => Some((*pid, *kind)),
                _ => None,
            })
            .collect()
    }

    /// Pids that received `directive`, one entry per delivery.
    pub fn deliveries(&self, directive: Directive) -> Vec<u32> {
        lock(&self.state)
            .journal
            .iter()
            .filter_map(|r| match r {
                SimRecord::Delivered { pid, directive: d } if *d == directive => Some(*pid),
                _ => None,
            })
            .collect()
    }

    pub fn kind_of(&self, pid: u32) -> Option<ControllerKind> {
        lock(&self.state).kinds.get(&pid).copied()
    }

    /// Pids whose controller is still running.
    pub fn running(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = lock(&self.state).mailboxes.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    fn behavior_for(&self, kind: ControllerKind) -> SimBehavior {
        let mut state = lock(&self.state);
        if let Some(next) = state.queued.get_mut(&kind).and_then(VecDeque::pop_front) {
            return next;
        }
        state.behaviors.get(&kind).cloned().unwrap_or_default()
    }
}

impl Backend for SimBackend {
    fn spawn(&self, request: &LaunchRequest) -> Result<ChildHandle, LaunchError> {
        let behavior = self.behavior_for(request.kind);
        if behavior.fail_spawn {
            return Err(LaunchError::Spawn {
                kind: request.kind,
                message: "simulated spawn failure".to_string(),
            });
        }
        if request.argv.is_empty() {
            return Err(LaunchError::EmptyCommand { kind: request.kind });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        {
            let mut state = lock(&self.state);
            state.mailboxes.insert(pid, inbox_tx);
            state.kinds.insert(pid, request.kind);
            state.journal.push(SimRecord::Spawned {
                pid,
                kind: request.kind,
                argv: request.argv.clone(),
            });
        }

        let (handle, notifier, kill) = ChildHandle::pair(pid, self.events.clone());
        let child = SimChild {
            pid,
            behavior,
            inbox: inbox_rx,
            ready: match &self.ready_socket {
                Some(path) => ReadyPath::Socket {
                    path: path.clone(),
                    reporter: None,
                },
                None => ReadyPath::Channel(self.events.clone()),
            },
        };
        tokio::spawn(child.run(kill, notifier, Arc::clone(&self.state)));
        Ok(handle)
    }

    fn deliver(&self, pid: u32, directive: Directive) -> Result<(), DeliveryError> {
        let mut state = lock(&self.state);
        let sent = state
            .mailboxes
            .get(&pid)
            .is_some_and(|tx| tx.send(directive).is_ok());
        if !sent {
            return Err(DeliveryError::NotRunning { pid });
        }
        state.journal.push(SimRecord::Delivered { pid, directive });
        Ok(())
    }

    fn pin_to_core(&self, pid: u32, core: usize) -> Result<(), SchedError> {
        lock(&self.state).journal.push(SimRecord::Pinned { pid, core });
        Ok(())
    }

    fn elevate_priority(&self, pid: u32, nice: i32) -> Result<i32, SchedError> {
        lock(&self.state)
            .journal
            .push(SimRecord::Elevated { pid, nice });
        Ok(nice)
    }

    fn available_cores(&self) -> usize {
        self.cores
    }
}

enum ReadyPath {
    Channel(EventSender),
    Socket {
        path: PathBuf,
        reporter: Option<ReadyReporter>,
    },
}

struct SimChild {
    pid: u32,
    behavior: SimBehavior,
    inbox: mpsc::UnboundedReceiver<Directive>,
    ready: ReadyPath,
}

impl SimChild {
    async fn run(mut self, kill: KillRequest, notifier: ExitNotifier, state: Arc<Mutex<SimState>>) {
        let pid = self.pid;
        let report = tokio::select! {
            report = self.script() => report,
            Ok(()) = kill => ExitReport::new(pid, None, Some(libc::SIGKILL)),
        };
        {
            let mut state = lock(&state);
            state.mailboxes.remove(&pid);
            state.journal.push(SimRecord::Exited(report.clone()));
        }
        notifier.notify(report);
    }

    async fn script(&mut self) -> ExitReport {
        let mut readies = 0u32;
        let mut gos = 0u32;

        sleep(self.behavior.ready_delay).await;
        if self.behavior.crash_at_start {
            return ExitReport::new(self.pid, Some(1), None);
        }
        self.announce(&mut readies).await;

        while let Some(directive) = self.inbox.recv().await {
            match directive {
                Directive::Go => {
                    gos += 1;
                    if self.behavior.crash_on_go == Some(gos) {
                        return ExitReport::new(self.pid, Some(1), None);
                    }
                    sleep(self.behavior.capture + self.behavior.ready_delay).await;
                    self.announce(&mut readies).await;
                }
                Directive::Stop => {
                    if !self.behavior.ignore_stop {
                        return ExitReport::new(self.pid, Some(0), None);
                    }
                }
            }
        }
        ExitReport::new(self.pid, Some(0), None)
    }

    async fn announce(&mut self, readies: &mut u32) {
        if self.behavior.ready_limit.is_some_and(|limit| *readies >= limit) {
            return;
        }
        *readies += 1;
        match &mut self.ready {
            ReadyPath::Channel(events) => {
                let _ = events.send(ControllerEvent::Ready(ReadyStamp::now(self.pid)));
            }
            ReadyPath::Socket { path, reporter } => {
                if reporter.is_none() {
                    *reporter = ReadyReporter::connect(path, self.pid).await.ok();
                }
                if let Some(reporter) = reporter {
                    let _ = reporter.ready().await;
                }
            }
        }
    }
}
