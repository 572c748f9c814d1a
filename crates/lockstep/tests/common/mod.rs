//! Common test utilities for lockstep tests
//!
//! Builds a supervisor wired to simulated controllers, with the burst log in
//! a temporary directory.

#![allow(dead_code)]

pub mod sim;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lockconf::{ControllerKind, LockConfig, Registry};
use lockstep::burst_log::BurstRecord;
use lockstep::{BurstLog, LogEntry, ReadyListener, Supervisor};
use sim::SimBackend;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Experiment config text for `kinds`, in order.
pub fn config_text(kinds: &[ControllerKind]) -> String {
    let mut text = String::from("# generated for tests\n/tmp/lockstep_test_session\n");
    for kind in kinds {
        text.push_str(&format!(
            "sim {}.py {{experiment}}_burst{{burst}} --is_subprocess 1 --parent_pid {{parent_pid}}\n",
            kind.script_stem()
        ));
    }
    text
}

pub fn registry(kinds: &[ControllerKind]) -> Registry {
    Registry::parse(&config_text(kinds)).expect("test registry should parse")
}

/// Short timeouts suited to paused-clock tests.
pub fn settings() -> LockConfig {
    let mut settings = LockConfig::default();
    settings.timing.ready_timeout_secs = 5.0;
    settings.timing.progress_interval_secs = 1.0;
    settings.timing.stop_grace_secs = 2.0;
    settings.timing.restart_cooldown_secs = 1.0;
    settings
}

/// A simulated rig: backend, log location and cancel handle.
pub struct SimRig {
    pub backend: Arc<SimBackend>,
    pub log_path: PathBuf,
    pub cancel: CancellationToken,
    ready: Option<ReadyListener>,
    _temp_dir: TempDir,
}

impl SimRig {
    /// Build the rig and its supervisor. `configure` scripts controller
    /// behavior before anything is spawned.
    pub fn start(
        kinds: &[ControllerKind],
        settings: &LockConfig,
        configure: impl FnOnce(&SimBackend),
    ) -> (SimRig, Supervisor) {
        Self::build(kinds, settings, false, configure)
    }

    /// Like [`SimRig::start`], but controllers report READY through a real
    /// ready socket in the rig's temp dir. Needs a running tokio runtime.
    pub fn start_over_socket(
        kinds: &[ControllerKind],
        settings: &LockConfig,
        configure: impl FnOnce(&SimBackend),
    ) -> (SimRig, Supervisor) {
        Self::build(kinds, settings, true, configure)
    }

    fn build(
        kinds: &[ControllerKind],
        settings: &LockConfig,
        over_socket: bool,
        configure: impl FnOnce(&SimBackend),
    ) -> (SimRig, Supervisor) {
        let temp_dir = TempDir::new().expect("temp dir");
        let log_path = temp_dir.path().join("bursts.jsonl");
        let log = BurstLog::open(&log_path).expect("open burst log");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (backend, ready) = if over_socket {
            let listener = ReadyListener::bind(temp_dir.path().join("ready.sock"), events_tx.clone())
                .expect("bind ready socket");
            let backend = SimBackend::over_socket(events_tx, listener.path());
            (Arc::new(backend), Some(listener))
        } else {
            (Arc::new(SimBackend::new(events_tx)), None)
        };
        configure(&backend);

        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(
            backend.clone(),
            events_rx,
            registry(kinds),
            settings,
            log,
        )
        .with_cancel(cancel.clone());

        (
            SimRig {
                backend,
                log_path,
                cancel,
                ready,
                _temp_dir: temp_dir,
            },
            supervisor,
        )
    }

    /// Path of the rig's ready socket, if it has one.
    pub fn ready_socket(&self) -> Option<&Path> {
        self.ready.as_ref().map(ReadyListener::path)
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        BurstLog::read_all(&self.log_path).expect("read burst log")
    }

    pub fn bursts(&self) -> Vec<BurstRecord> {
        self.log_entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Burst(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn burst_numbers(&self) -> Vec<u32> {
        self.bursts().iter().map(|b| b.burst).collect()
    }

    /// Pids spawned for `kind`, in spawn order.
    pub fn pids_of(&self, kind: ControllerKind) -> Vec<u32> {
        self.backend
            .spawned()
            .into_iter()
            .filter(|(_, k)| *k == kind)
            .map(|(pid, _)| pid)
            .collect()
    }

    pub fn all_pids(&self) -> Vec<u32> {
        self.backend.spawned().into_iter().map(|(pid, _)| pid).collect()
    }
}

/// Sort a pid list for order-insensitive comparison.
pub fn sorted(mut pids: Vec<u32>) -> Vec<u32> {
    pids.sort_unstable();
    pids
}
