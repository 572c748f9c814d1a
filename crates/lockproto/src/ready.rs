//! READY over a local socket.
//!
//! The orchestrator binds one Unix stream socket per run and hands its path
//! to every controller in [`READY_SOCKET_ENV`]. A controller connects once
//! and writes one JSON line per READY:
//!
//! ```text
//! {"type":"ready","pid":4242}
//! ```
//!
//! Each line names its sender, so simultaneous READYs from different
//! controllers never merge and a repeat from the same controller is
//! recognizable.

use serde::{Deserialize, Serialize};

/// Environment variable carrying the ready socket path to controllers.
pub const READY_SOCKET_ENV: &str = "LOCKSTEP_READY_SOCKET";

/// A message a controller writes on the ready socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    /// Initialized (or done with a burst) and waiting for GO.
    Ready { pid: u32 },
}

impl ControllerMessage {
    /// Encode as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    pub fn pid(&self) -> u32 {
        match self {
            ControllerMessage::Ready { pid } => *pid,
        }
    }
}
