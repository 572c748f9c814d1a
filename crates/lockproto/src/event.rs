//! Events flowing from controllers back to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One READY observation from controller `pid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyStamp {
    pub pid: u32,
    pub at: DateTime<Utc>,
}

impl ReadyStamp {
    pub fn now(pid: u32) -> Self {
        Self {
            pid,
            at: Utc::now(),
        }
    }
}

/// How a controller process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReport {
    pub pid: u32,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if it was killed.
    pub signal: Option<i32>,
    pub at: DateTime<Utc>,
}

impl ExitReport {
    pub fn new(pid: u32, code: Option<i32>, signal: Option<i32>) -> Self {
        Self {
            pid,
            code,
            signal,
            at: Utc::now(),
        }
    }

    /// True when the process exited with status 0.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "pid {} exited with status {}", self.pid, code),
            (None, Some(sig)) => write!(f, "pid {} killed by signal {}", self.pid, sig),
            (None, None) => write!(f, "pid {} exited", self.pid),
        }
    }
}

/// Anything a controller (or its exit monitor) reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Ready(ReadyStamp),
    Exited(ExitReport),
}
