//! Controller registry: the experiment config file.
//!
//! Line format:
//!
//! ```text
//! # comments and blank lines are ignored
//! /media/eds/EXTERNAL1/all_together_now
//! python3 Camera_com.py {experiment}_burst{burst}_world.avi 10 --is_subprocess 1 --parent_pid {parent_pid}
//! python3 Pupil_com.py {experiment}_burst{burst}_pupil.mp4 10 --is_subprocess 1 --parent_pid {parent_pid}
//! ```
//!
//! The first remaining line names the experiment (usually its output path).
//! Every further line is one controller command, split on whitespace. A
//! command must name a known controller script and carry the `{burst}`
//! placeholder plus the subprocess and parent-pid markers; the orchestrator
//! fills in the placeholders at each launch.

use lockproto::{
    BurstToken, BURST_PLACEHOLDER, EXPERIMENT_PLACEHOLDER, PARENT_FLAG, PARENT_PLACEHOLDER,
    SUBPROCESS_FLAG,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read experiment config {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Experiment config has no experiment name line")]
    MissingExperiment,

    #[error("Experiment config lists no controllers")]
    NoControllers,

    #[error("Line {line}: no known controller in `{command}`")]
    UnknownController { line: usize, command: String },

    #[error("Line {line}: controller {kind} is listed more than once")]
    DuplicateController { line: usize, kind: ControllerKind },

    #[error("Line {line}: {kind} command is missing the {placeholder} placeholder")]
    MissingPlaceholder {
        line: usize,
        kind: ControllerKind,
        placeholder: &'static str,
    },

    #[error("Line {line}: {kind} command must include `{marker}`")]
    MissingMarker {
        line: usize,
        kind: ControllerKind,
        marker: String,
    },
}

/// The fixed set of controllers the rig knows how to coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    /// Minispect spectrometer
    MiniSpect,
    /// World camera
    World,
    /// Pupil camera
    Pupil,
    /// Sunglasses sensor
    Sunglasses,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 4] = [
        ControllerKind::MiniSpect,
        ControllerKind::World,
        ControllerKind::Pupil,
        ControllerKind::Sunglasses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerKind::MiniSpect => "MS",
            ControllerKind::World => "World",
            ControllerKind::Pupil => "Pupil",
            ControllerKind::Sunglasses => "Sunglasses",
        }
    }

    /// Script stem that identifies this controller on a command line.
    pub fn script_stem(&self) -> &'static str {
        match self {
            ControllerKind::MiniSpect => "MS_com",
            ControllerKind::World => "Camera_com",
            ControllerKind::Pupil => "Pupil_com",
            ControllerKind::Sunglasses => "Sunglasses_com",
        }
    }

    /// Identify a controller from one command-line token.
    pub fn from_token(token: &str) -> Option<Self> {
        let stem = Path::new(token).file_stem()?.to_str()?;
        Self::ALL.into_iter().find(|kind| kind.script_stem() == stem)
    }
}

impl std::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A controller command with unresolved placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Substitute every placeholder, yielding the argv to execute.
    pub fn resolve(&self, burst: BurstToken, parent_pid: u32, experiment: &str) -> Vec<String> {
        let burst = burst.render();
        let parent = parent_pid.to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace(BURST_PLACEHOLDER, &burst)
                    .replace(PARENT_PLACEHOLDER, &parent)
                    .replace(EXPERIMENT_PLACEHOLDER, experiment)
            })
            .collect()
    }

    fn has_flag_value(&self, flag: &str, value: &str) -> bool {
        self.argv
            .windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }
}

/// One registered controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSpec {
    pub kind: ControllerKind,
    pub template: CommandTemplate,
}

/// Ordered controller set for one experiment. Launch and broadcast order
/// follow registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    experiment: String,
    specs: Vec<ControllerSpec>,
}

impl Registry {
    /// Load the experiment config file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let contents = std::fs::read_to_string(path).map_err(|e| RegistryError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents)
    }

    /// Parse experiment config text.
    pub fn parse(contents: &str) -> Result<Self, RegistryError> {
        let mut lines = contents
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let (_, experiment) = lines.next().ok_or(RegistryError::MissingExperiment)?;
        let mut specs: Vec<ControllerSpec> = Vec::new();

        for (line_no, line) in lines {
            let template = CommandTemplate::new(line.split_whitespace());
            let kind = template
                .argv()
                .iter()
                .find_map(|token| ControllerKind::from_token(token))
                .ok_or_else(|| RegistryError::UnknownController {
                    line: line_no,
                    command: line.to_string(),
                })?;

            if specs.iter().any(|s| s.kind == kind) {
                return Err(RegistryError::DuplicateController { line: line_no, kind });
            }
            validate_template(line_no, kind, &template)?;
            specs.push(ControllerSpec { kind, template });
        }

        if specs.is_empty() {
            return Err(RegistryError::NoControllers);
        }

        Ok(Self {
            experiment: experiment.to_string(),
            specs,
        })
    }

    /// The experiment line as written (name or output path).
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Final path component of the experiment line.
    pub fn experiment_name(&self) -> &str {
        Path::new(&self.experiment)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.experiment)
    }

    pub fn specs(&self) -> &[ControllerSpec] {
        &self.specs
    }

    pub fn get(&self, kind: ControllerKind) -> Option<&ControllerSpec> {
        self.specs.iter().find(|s| s.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

fn validate_template(
    line: usize,
    kind: ControllerKind,
    template: &CommandTemplate,
) -> Result<(), RegistryError> {
    if !template.argv().iter().any(|a| a.contains(BURST_PLACEHOLDER)) {
        return Err(RegistryError::MissingPlaceholder {
            line,
            kind,
            placeholder: BURST_PLACEHOLDER,
        });
    }
    if !template.has_flag_value(SUBPROCESS_FLAG, "1") {
        return Err(RegistryError::MissingMarker {
            line,
            kind,
            marker: format!("{} 1", SUBPROCESS_FLAG),
        });
    }
    if !template.has_flag_value(PARENT_FLAG, PARENT_PLACEHOLDER) {
        return Err(RegistryError::MissingMarker {
            line,
            kind,
            marker: format!("{} {}", PARENT_FLAG, PARENT_PLACEHOLDER),
        });
    }
    Ok(())
}
