//! Append-only JSON Lines log of completed bursts and run attempts.
//!
//! One line per event, flushed and synced before `append` returns so a crash
//! never loses a burst that was already reported complete.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lockproto::ReadyStamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LogError;

/// One completed burst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstRecord {
    pub run_id: Uuid,
    pub attempt: u32,
    pub burst: u32,
    /// READYs that released the barrier for this burst.
    pub ready: Vec<ReadyStamp>,
    pub ready_spread_us: Option<i64>,
    pub go_at: DateTime<Utc>,
    pub go_spread_us: Option<i64>,
    pub completed_at: DateTime<Utc>,
}

/// End of one launch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub run_id: Uuid,
    pub attempt: u32,
    /// Bursts completed during this attempt.
    pub completed: u32,
    /// Bursts this attempt was asked for.
    pub requested: u32,
    pub crashed: bool,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// End of the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub requested: u32,
    pub completed: u32,
    pub attempts: u32,
    pub outcome: String,
    pub exit_code: u8,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Burst(BurstRecord),
    Attempt(AttemptRecord),
    Run(RunRecord),
}

pub struct BurstLog {
    path: PathBuf,
    file: File,
}

impl BurstLog {
    /// Open (creating parent directories) for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LogError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LogError::Io {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, entry: &LogEntry) -> Result<(), LogError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| LogError::Io {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Read every entry back, skipping blank lines.
    pub fn read_all(path: &Path) -> Result<Vec<LogEntry>, LogError> {
        let file = File::open(path).map_err(|e| LogError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| LogError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|e| LogError::Decode {
                path: path.to_path_buf(),
                line: idx + 1,
                message: e.to_string(),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Default log location for an experiment.
pub fn default_log_path(log_dir: &Path, experiment_name: &str) -> PathBuf {
    log_dir.join(format!("{}_bursts.jsonl", experiment_name))
}
