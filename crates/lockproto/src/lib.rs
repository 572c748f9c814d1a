//! lockproto - Protocol vocabulary for lockstep controllers
//!
//! Defines what travels between the orchestrator and the controller
//! processes it coordinates. Controllers are opaque OS processes, so the
//! protocol is a small set of directives and events:
//!
//! - **READY** (controller → orchestrator, over the ready socket):
//!   "initialized, waiting for GO"
//! - **GO** (orchestrator → controller): "begin or continue this burst"
//! - **STOP** (orchestrator → controller): "finish writes and exit 0"
//!
//! READY and GO always travel on distinct channels: READY is a pid-stamped
//! line on a per-run Unix socket ([`ready`]), GO and STOP are signals to the
//! controller ([`SignalPlan`]).
//!
//! ## Collaborator contract
//!
//! A controller launched as a subprocess must:
//! 1. perform its own initialization
//! 2. connect to the socket named by [`READY_SOCKET_ENV`] and send READY
//! 3. block until GO arrives, then capture one burst
//! 4. send READY again if it can take another burst
//! 5. on STOP, finish any in-flight write and exit with status 0

pub mod directive;
pub mod event;
pub mod ready;
pub mod signals;
pub mod timing;

pub use directive::Directive;
pub use event::{ControllerEvent, ExitReport, ReadyStamp};
pub use ready::{ControllerMessage, READY_SOCKET_ENV};
pub use signals::{SignalPlan, SignalPlanError};
pub use timing::{spread, BurstToken};

/// Placeholder substituted with the burst number (or the neutral token).
pub const BURST_PLACEHOLDER: &str = "{burst}";

/// Placeholder substituted with the orchestrator's process id.
pub const PARENT_PLACEHOLDER: &str = "{parent_pid}";

/// Placeholder substituted with the experiment name.
pub const EXPERIMENT_PLACEHOLDER: &str = "{experiment}";

/// Marker flag telling a controller it runs under an orchestrator.
pub const SUBPROCESS_FLAG: &str = "--is_subprocess";

/// Flag carrying the parent identity to a controller.
pub const PARENT_FLAG: &str = "--parent_pid";
