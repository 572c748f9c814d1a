//! Ready socket: where controllers report READY.
//!
//! One Unix stream socket per run. Each controller connects once and writes
//! a pid-stamped line per READY; every connection gets its own reader task,
//! so READYs from different controllers never merge.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lockproto::{ControllerEvent, ControllerMessage, ReadyStamp};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::EventSender;

/// Owner read/write only.
const SOCKET_MODE: u32 = 0o600;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The bound ready socket. Dropping it stops accepting and removes the file.
#[derive(Debug)]
pub struct ReadyListener {
    path: PathBuf,
    accept: JoinHandle<()>,
}

impl ReadyListener {
    /// Bind `path` and forward every READY line to `events`.
    ///
    /// A stale socket file at `path` is replaced. Must run inside a tokio
    /// runtime.
    pub fn bind(path: impl Into<PathBuf>, events: EventSender) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        remove_stale(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to bind ready socket {}: {}", path.display(), e),
            )
        })?;
        set_mode(&path)?;

        let accept = tokio::spawn(accept_loop(listener, events));
        info!(socket = %path.display(), "ready socket bound");

        Ok(Self { path, accept })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ReadyListener {
    fn drop(&mut self) {
        self.accept.abort();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(socket = %self.path.display(), error = %e, "failed to remove ready socket");
            }
        }
    }
}

fn remove_stale(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn set_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
}

async fn accept_loop(listener: UnixListener, events: EventSender) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                tokio::spawn(read_readies(stream, events.clone()));
            }
            Err(e) => {
                warn!(error = %e, "ready socket accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn read_readies(stream: UnixStream, events: EventSender) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "ready connection failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match ControllerMessage::from_line(&line) {
            Ok(ControllerMessage::Ready { pid }) => {
                let event = ControllerEvent::Ready(ReadyStamp::now(pid));
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => warn!(line = %line, error = %e, "malformed controller message"),
        }
    }
    debug!("ready connection closed");
}

/// Controller side of the ready socket.
#[derive(Debug)]
pub struct ReadyReporter {
    stream: UnixStream,
    pid: u32,
}

impl ReadyReporter {
    /// Connect to the orchestrator's ready socket as controller `pid`.
    pub async fn connect(path: &Path, pid: u32) -> io::Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to connect to ready socket {}: {}", path.display(), e),
            )
        })?;
        Ok(Self { stream, pid })
    }

    /// Report READY.
    pub async fn ready(&mut self) -> io::Result<()> {
        let line = ControllerMessage::Ready { pid: self.pid }.to_line()?;
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await
    }
}
