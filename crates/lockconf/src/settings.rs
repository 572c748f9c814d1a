//! Orchestrator settings sections.
//!
//! Every field has a compiled default so an empty (or missing) settings file
//! yields a working orchestrator.

use lockproto::{SignalPlan, SignalPlanError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timeouts and cadences, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// How long every controller gets to report READY.
    /// Default: 30
    #[serde(default = "TimingConfig::default_ready_timeout_secs")]
    pub ready_timeout_secs: f64,

    /// Interval between "still waiting" messages during a barrier wait.
    /// Default: 2
    #[serde(default = "TimingConfig::default_progress_interval_secs")]
    pub progress_interval_secs: f64,

    /// Grace period after STOP before a controller is killed.
    /// Default: 10
    #[serde(default = "TimingConfig::default_stop_grace_secs")]
    pub stop_grace_secs: f64,

    /// Pause before relaunching the group after a failed attempt.
    /// Default: 5
    #[serde(default = "TimingConfig::default_restart_cooldown_secs")]
    pub restart_cooldown_secs: f64,
}

impl TimingConfig {
    fn default_ready_timeout_secs() -> f64 {
        30.0
    }

    fn default_progress_interval_secs() -> f64 {
        2.0
    }

    fn default_stop_grace_secs() -> f64 {
        10.0
    }

    fn default_restart_cooldown_secs() -> f64 {
        5.0
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ready_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs_f64(self.progress_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs_f64(self.stop_grace_secs)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.restart_cooldown_secs)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: Self::default_ready_timeout_secs(),
            progress_interval_secs: Self::default_progress_interval_secs(),
            stop_grace_secs: Self::default_stop_grace_secs(),
            restart_cooldown_secs: Self::default_restart_cooldown_secs(),
        }
    }
}

/// Signal names for the GO and STOP directives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalsConfig {
    /// Orchestrator → controller. Default: SIGUSR2
    #[serde(default = "SignalsConfig::default_go")]
    pub go: String,

    /// Orchestrator → controller. Default: SIGTERM
    #[serde(default = "SignalsConfig::default_stop")]
    pub stop: String,
}

impl SignalsConfig {
    fn default_go() -> String {
        "SIGUSR2".to_string()
    }

    fn default_stop() -> String {
        "SIGTERM".to_string()
    }

    pub fn plan(&self) -> Result<SignalPlan, SignalPlanError> {
        SignalPlan::from_names(&self.go, &self.stop)
    }
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            go: Self::default_go(),
            stop: Self::default_stop(),
        }
    }
}

/// CPU pinning and priority elevation for launched controllers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulingConfig {
    /// Pin controller `i` to core `first_core + i`. Default: true
    #[serde(default = "SchedulingConfig::default_true")]
    pub pin_cpus: bool,

    /// Core index for the first controller. Default: 0
    #[serde(default)]
    pub first_core: usize,

    /// Raise controller priority. Default: true
    #[serde(default = "SchedulingConfig::default_true")]
    pub elevate_priority: bool,

    /// Niceness requested for controllers (-20 is the highest priority).
    /// Default: -20
    #[serde(default = "SchedulingConfig::default_nice")]
    pub nice: i32,
}

impl SchedulingConfig {
    fn default_true() -> bool {
        true
    }

    fn default_nice() -> i32 {
        -20
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            pin_cpus: true,
            first_core: 0,
            elevate_priority: true,
            nice: Self::default_nice(),
        }
    }
}

/// How controllers are launched across bursts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// One launch per attempt; bursts are separated by READY/GO cycles.
    #[default]
    Persistent,
    /// A fresh launch for every burst, stopped when the burst ends.
    PerBurst,
}

impl LaunchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::Persistent => "persistent",
            LaunchMode::PerBurst => "per_burst",
        }
    }
}

impl std::str::FromStr for LaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "persistent" => Ok(LaunchMode::Persistent),
            "per_burst" => Ok(LaunchMode::PerBurst),
            other => Err(format!("unknown launch mode: {}", other)),
        }
    }
}

/// Run-level policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub launch_mode: LaunchMode,

    /// Relaunches allowed after failed attempts. 0 means unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_restarts: u32,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathsConfig {
    /// Directory for burst logs when no explicit log path is given.
    /// Default: ~/.local/share/lockstep
    #[serde(default = "PathsConfig::default_log_dir")]
    pub log_dir: PathBuf,

    /// Directory for the per-run ready socket.
    /// Default: $XDG_RUNTIME_DIR/lockstep, else /tmp/lockstep
    #[serde(default = "PathsConfig::default_socket_dir")]
    pub socket_dir: PathBuf,
}

impl PathsConfig {
    fn default_socket_dir() -> PathBuf {
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("lockstep")
    }

    /// Ready socket path for the orchestrator process `pid`.
    pub fn ready_socket(&self, pid: u32) -> PathBuf {
        self.socket_dir.join(format!("ready-{}.sock", pid))
    }

    fn default_log_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/lockstep"))
            .unwrap_or_else(|| PathBuf::from(".local/share/lockstep"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: Self::default_log_dir(),
            socket_dir: Self::default_socket_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
