//! Orchestrator state machine states.
//!
//! The control loop is the only writer. Readers (the interrupt handler, run
//! summaries) load the current state lock-free.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

/// Where the orchestrator is in its launch/burst/stop cycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Launching = 0,
    AwaitingReady = 1,
    BroadcastingGo = 2,
    BurstActive = 3,
    AwaitingNextReady = 4,
    Stopping = 5,
    Terminated = 6,
}

impl OrchestratorState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => OrchestratorState::Launching,
            1 => OrchestratorState::AwaitingReady,
            2 => OrchestratorState::BroadcastingGo,
            3 => OrchestratorState::BurstActive,
            4 => OrchestratorState::AwaitingNextReady,
            5 => OrchestratorState::Stopping,
            _ => OrchestratorState::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Launching => "LAUNCHING",
            OrchestratorState::AwaitingReady => "AWAITING_READY",
            OrchestratorState::BroadcastingGo => "BROADCASTING_GO",
            OrchestratorState::BurstActive => "BURST_ACTIVE",
            OrchestratorState::AwaitingNextReady => "AWAITING_NEXT_READY",
            OrchestratorState::Stopping => "STOPPING",
            OrchestratorState::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared cell holding the current state.
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OrchestratorState::Terminated as u8),
        }
    }

    pub fn get(&self) -> OrchestratorState {
        OrchestratorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: OrchestratorState) -> OrchestratorState {
        let prev = OrchestratorState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            debug!(from = %prev, to = %next, "state transition");
        }
        prev
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
