use std::{
    io,
    path::{Path, PathBuf},
};

use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use serde::{Deserialize, Serialize};

/// The persisted liveness record of the running daemon.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct PidRecord {
    pub pid: i32,
    /// absolute path of the configuration the daemon was started with; only `status`
    /// needs it, liveness and `stop` go by the PID alone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

#[derive(Deserialize)]
struct StoredRecord {
    pid: Option<i32>,
    config_file: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum RecordState {
    Absent,
    /// unreadable, not JSON, or holding a PID that cannot be a process
    Corrupt(String),
    MissingPid,
    Present(PidRecord),
}

pub(crate) fn read(path: &Path) -> RecordState {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return RecordState::Absent,
        Err(e) => return RecordState::Corrupt(e.to_string()),
    };
    let stored: StoredRecord = match serde_json::from_str(&contents) {
        Ok(stored) => stored,
        Err(e) => return RecordState::Corrupt(e.to_string()),
    };
    match stored {
        StoredRecord { pid: None, .. } => RecordState::MissingPid,
        StoredRecord { pid: Some(pid), .. } if pid <= 0 => {
            RecordState::Corrupt(format!("{pid} is not a valid PID"))
        }
        StoredRecord {
            pid: Some(pid),
            config_file,
        } => RecordState::Present(PidRecord { pid, config_file }),
    }
}

/// Writes through a temporary file so readers never see a half written record.
pub(crate) fn write(path: &Path, record: &PidRecord) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(record)?)?;
    std::fs::rename(&tmp, path)
}

pub(crate) fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Zero-signal existence probe. A process we may not signal still exists.
pub(crate) fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Removes the record when dropped, whichever way the supervisor exits.
pub(crate) struct RecordGuard {
    path: PathBuf,
}

impl RecordGuard {
    pub fn new(path: &Path) -> Self {
        RecordGuard {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        match remove(&self.path) {
            Ok(()) => tracing::debug!(target: "supervisor", "removed {}", self.path.display()),
            Err(e) => tracing::error!(
                target: "supervisor",
                "could not remove {}: {e}",
                self.path.display()
            ),
        }
    }
}
