//! Settings and controller registry loading for lockstep.
//!
//! Two kinds of input configure a run:
//!
//! - **Settings** (`LockConfig`): how the orchestrator behaves - timeouts,
//!   signals, CPU pinning, restart policy, log locations. Layered TOML plus
//!   environment overrides.
//!
//! - **Registry** (`Registry`): which controllers to launch and how. Parsed
//!   from the experiment config file, one controller command per line.
//!
//! # Settings File Locations
//!
//! Files are merged in order (later wins, key by key):
//! 1. `/etc/lockstep/config.toml` (system)
//! 2. `~/.config/lockstep/config.toml` (user)
//! 3. `./lockstep.toml` (local override, replaced by an explicit path)
//! 4. Environment variables (`LOCKSTEP_*`)
//!
//! # Example Settings
//!
//! ```toml
//! [timing]
//! ready_timeout_secs = 30
//! stop_grace_secs = 10
//! restart_cooldown_secs = 5
//!
//! [signals]
//! go = "SIGUSR2"
//! stop = "SIGTERM"
//!
//! [scheduling]
//! pin_cpus = true
//! nice = -20
//!
//! [run]
//! launch_mode = "persistent"
//! max_restarts = 0
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod registry;
pub mod settings;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use registry::{CommandTemplate, ControllerKind, ControllerSpec, Registry, RegistryError};
pub use settings::{
    LaunchMode, PathsConfig, RunConfig, SchedulingConfig, SignalsConfig, TelemetryConfig,
    TimingConfig,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Settings loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Settings file {path} does not exist")]
    Missing { path: PathBuf },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Complete orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LockConfig {
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub signals: SignalsConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl LockConfig {
    /// Load settings from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load settings, letting `config_path` replace the local `./lockstep.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load settings from optional path and report which sources applied.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path)? {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last())?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject settings that cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("timing.ready_timeout_secs", self.timing.ready_timeout_secs),
            ("timing.progress_interval_secs", self.timing.progress_interval_secs),
            ("timing.stop_grace_secs", self.timing.stop_grace_secs),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("must be a positive number of seconds, got {}", value),
                });
            }
        }
        let cooldown = self.timing.restart_cooldown_secs;
        if !(cooldown.is_finite() && cooldown >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "timing.restart_cooldown_secs",
                message: format!("must not be negative, got {}", cooldown),
            });
        }
        if !(-20..=19).contains(&self.scheduling.nice) {
            return Err(ConfigError::Invalid {
                field: "scheduling.nice",
                message: format!("must be within -20..=19, got {}", self.scheduling.nice),
            });
        }
        self.signals.plan().map_err(|e| ConfigError::Invalid {
            field: "signals",
            message: e.to_string(),
        })?;
        Ok(())
    }
}
