//! lockstep - start and stop sensor controller processes in lock-step.
//!
//! The orchestrator launches one process per registered controller, waits
//! until every one reports READY, broadcasts GO, lets the burst run, and
//! repeats until the requested number of bursts is done. Then it broadcasts
//! STOP. A controller crash or readiness timeout mid-run tears the group down
//! and relaunches it for the remaining bursts.
//!
//! ```text
//!   Supervisor ──attempt──▶ BurstLoop ──▶ Launcher ──spawn──▶ Backend
//!        ▲                     │  ▲                             │
//!        │                     │  └── ReadinessBarrier ◀─READY──┤
//!        └── RunSummary        └────▶ Broadcaster ──GO/STOP────▶┘
//! ```

pub mod backend;
pub mod barrier;
pub mod broadcast;
pub mod burst_log;
pub mod burst_loop;
pub mod error;
pub mod launcher;
pub mod sched;
pub mod state;
pub mod supervisor;
pub mod telemetry;

pub use backend::{Backend, OsBackend, ReadyListener, ReadyReporter, StdioMode};
pub use barrier::ReadinessBarrier;
pub use burst_log::{BurstLog, LogEntry};
pub use burst_loop::{LoopEnd, LoopOutcome};
pub use error::{LaunchError, OrchestratorError};
pub use state::OrchestratorState;
pub use supervisor::{exit_code, RunEnd, RunSummary, Supervisor};
