//! Error types for the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use lockconf::{ConfigError, ControllerKind, RegistryError};
use lockproto::{Directive, SignalPlanError};
use thiserror::Error;

/// A controller could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{kind} command is empty")]
    EmptyCommand { kind: ControllerKind },

    #[error("Failed to spawn {kind}: {message}")]
    Spawn {
        kind: ControllerKind,
        message: String,
    },
}

/// CPU pinning or priority change failed. Never fatal to a launch.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("{op} failed for pid {pid}: {source}")]
    Os {
        op: &'static str,
        pid: u32,
        source: std::io::Error,
    },
}

/// A directive could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("pid {pid} is not running")]
    NotRunning { pid: u32 },

    #[error("Failed to deliver {directive} to pid {pid}: {message}")]
    Failed {
        pid: u32,
        directive: Directive,
        message: String,
    },
}

/// The readiness barrier did not close in time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BarrierError {
    #[error("readiness timeout: {observed}/{expected} controllers ready after {waited:?}")]
    Timeout {
        observed: usize,
        expected: usize,
        waited: Duration,
    },
}

/// Burst log persistence failures.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Burst log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode burst log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Malformed burst log line {line} in {path}: {message}")]
    Decode {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Everything that can stop the orchestrator before the first launch.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Signals(#[from] SignalPlanError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("Failed to open the ready socket: {0}")]
    ReadySocket(std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
