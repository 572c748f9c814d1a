//! Settings file discovery, table merging, and environment variable overlay.

use crate::{ConfigError, LockConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where settings came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Settings files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode settings
    pub env_overrides: Vec<String>,
}

/// Discover settings files, optionally with a CLI override path.
///
/// If `cli_path` is provided it replaces the local override and must exist.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(
    cli_path: Option<&Path>,
) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/lockstep/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("lockstep/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        files.push(path.to_path_buf());
        return Ok(files);
    }

    let local = PathBuf::from("lockstep.toml");
    if local.exists() {
        files.push(local);
    }

    Ok(files)
}

/// Read one settings file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` into `base` key by key; nested tables merge recursively.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Build settings from a merged table, filling gaps with defaults.
pub fn from_table(table: toml::Table, origin: Option<&PathBuf>) -> Result<LockConfig, ConfigError> {
    let mut config: LockConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.cloned().unwrap_or_default(),
                message: e.to_string(),
            })?;

    // Paths in files may use ~ or $VAR
    config.paths.log_dir = expand_path(&config.paths.log_dir.to_string_lossy());
    config.paths.socket_dir = expand_path(&config.paths.socket_dir.to_string_lossy());
    Ok(config)
}

/// Apply environment variable overrides to settings.
pub fn apply_env_overrides(config: &mut LockConfig, sources: &mut ConfigSources) {
    apply_overrides_from(env::vars(), config, sources);
}

/// Apply `LOCKSTEP_*` (and `RUST_LOG`) overrides from any key/value source.
///
/// Unparseable values are skipped and not recorded as overrides.
pub fn apply_overrides_from<I>(vars: I, config: &mut LockConfig, sources: &mut ConfigSources)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut rust_log = None;

    for (key, value) in vars {
        let applied = match key.as_str() {
            "LOCKSTEP_READY_TIMEOUT_SECS" => set_parsed(&mut config.timing.ready_timeout_secs, &value),
            "LOCKSTEP_PROGRESS_INTERVAL_SECS" => {
                set_parsed(&mut config.timing.progress_interval_secs, &value)
            }
            "LOCKSTEP_STOP_GRACE_SECS" => set_parsed(&mut config.timing.stop_grace_secs, &value),
            "LOCKSTEP_RESTART_COOLDOWN_SECS" => {
                set_parsed(&mut config.timing.restart_cooldown_secs, &value)
            }
            "LOCKSTEP_GO_SIGNAL" => {
                config.signals.go = value;
                true
            }
            "LOCKSTEP_STOP_SIGNAL" => {
                config.signals.stop = value;
                true
            }
            "LOCKSTEP_PIN_CPUS" => set_parsed(&mut config.scheduling.pin_cpus, &value),
            "LOCKSTEP_FIRST_CORE" => set_parsed(&mut config.scheduling.first_core, &value),
            "LOCKSTEP_ELEVATE_PRIORITY" => {
                set_parsed(&mut config.scheduling.elevate_priority, &value)
            }
            "LOCKSTEP_NICE" => set_parsed(&mut config.scheduling.nice, &value),
            "LOCKSTEP_LAUNCH_MODE" => set_parsed(&mut config.run.launch_mode, &value),
            "LOCKSTEP_MAX_RESTARTS" => set_parsed(&mut config.run.max_restarts, &value),
            "LOCKSTEP_LOG_DIR" => {
                config.paths.log_dir = expand_path(&value);
                true
            }
            "LOCKSTEP_SOCKET_DIR" => {
                config.paths.socket_dir = expand_path(&value);
                true
            }
            "LOCKSTEP_LOG_LEVEL" => {
                config.telemetry.log_level = value;
                true
            }
            // RUST_LOG wins over LOCKSTEP_LOG_LEVEL regardless of iteration order
            "RUST_LOG" => {
                rust_log = Some(value);
                false
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }

    if let Some(filter) = rust_log {
        config.telemetry.log_level = filter;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.trim().parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LaunchMode;

    fn table(s: &str) -> toml::Table {
        s.parse().unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_merge_is_key_by_key() {
        let mut base = table(
            r#"
[timing]
ready_timeout_secs = 10
stop_grace_secs = 3
"#,
        );
        merge_tables(
            &mut base,
            table(
                r#"
[timing]
ready_timeout_secs = 20
"#,
            ),
        );

        let config = from_table(base, None).unwrap();
        assert_eq!(config.timing.ready_timeout_secs, 20.0);
        assert_eq!(config.timing.stop_grace_secs, 3.0);
        // Untouched sections keep defaults
        assert_eq!(config.signals.go, "SIGUSR2");
    }

    #[test]
    fn test_parse_full_table() {
        let config = from_table(
            table(
                r#"
[timing]
ready_timeout_secs = 12.5
progress_interval_secs = 1
stop_grace_secs = 4
restart_cooldown_secs = 0

[signals]
go = "SIGUSR2"
stop = "SIGINT"

[scheduling]
pin_cpus = false
first_core = 1
nice = -5

[run]
launch_mode = "per_burst"
max_restarts = 3

[paths]
log_dir = "/data/logs"
socket_dir = "/run/lockstep"

[telemetry]
log_level = "debug"
"#,
            ),
            None,
        )
        .unwrap();

        assert_eq!(config.timing.ready_timeout_secs, 12.5);
        assert_eq!(config.timing.restart_cooldown_secs, 0.0);
        assert_eq!(config.signals.stop, "SIGINT");
        assert!(!config.scheduling.pin_cpus);
        assert_eq!(config.scheduling.first_core, 1);
        assert_eq!(config.scheduling.nice, -5);
        assert_eq!(config.run.launch_mode, LaunchMode::PerBurst);
        assert_eq!(config.run.max_restarts, 3);
        assert_eq!(config.paths.log_dir, PathBuf::from("/data/logs"));
        assert_eq!(config.paths.socket_dir, PathBuf::from("/run/lockstep"));
        assert_eq!(config.telemetry.log_level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_type_is_parse_error() {
        let err = from_table(table("[timing]\nready_timeout_secs = \"soon\"\n"), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LockConfig::default();
        let mut sources = ConfigSources::default();
        let vars = vec![
            ("RUST_LOG".to_string(), "trace".to_string()),
            ("LOCKSTEP_LOG_LEVEL".to_string(), "warn".to_string()),
            ("LOCKSTEP_READY_TIMEOUT_SECS".to_string(), "7".to_string()),
            ("LOCKSTEP_LAUNCH_MODE".to_string(), "per_burst".to_string()),
            ("LOCKSTEP_NICE".to_string(), "not-a-number".to_string()),
            ("HOME".to_string(), "/ignored".to_string()),
        ];

        apply_overrides_from(vars, &mut config, &mut sources);

        assert_eq!(config.telemetry.log_level, "trace");
        assert_eq!(config.timing.ready_timeout_secs, 7.0);
        assert_eq!(config.run.launch_mode, LaunchMode::PerBurst);
        assert_eq!(config.scheduling.nice, -20);
        assert!(sources.env_overrides.contains(&"LOCKSTEP_READY_TIMEOUT_SECS".to_string()));
        assert!(!sources.env_overrides.contains(&"LOCKSTEP_NICE".to_string()));
        assert!(!sources.env_overrides.contains(&"HOME".to_string()));
    }
}
