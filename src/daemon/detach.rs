use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::fd::AsRawFd,
    path::Path,
};

use nix::{
    sys::wait::waitpid,
    unistd::{ForkResult, dup2, fork, pipe, setsid},
};

use super::SupervisorError;

const READY: &str = "ready";

/// Which side of the detach we ended up on.
pub(crate) enum Detached {
    /// the invoking process, free to report back to the user and exit
    Invoker,
    /// the session leader's child, with no controlling terminal
    Daemon(ReadyNotifier),
}

/// The daemon's end of the startup handshake. The invoker blocks until it is consumed
/// (or dropped, which reads as a failed start).
pub(crate) struct ReadyNotifier {
    pipe: File,
}

impl ReadyNotifier {
    #[cfg(test)]
    pub fn to_file(pipe: File) -> Self {
        ReadyNotifier { pipe }
    }

    pub fn ready(mut self) {
        let _ = self.pipe.write_all(READY.as_bytes());
    }

    pub fn failed(mut self, reason: &str) {
        let _ = self.pipe.write_all(reason.as_bytes());
    }
}

/// Double fork + setsid. The invoker returns once the daemon has reported that it is up
/// (or why it is not); the daemon gets stdin/stdout on /dev/null and stderr on `log_file`.
///
/// Must be called before any other thread exists, in particular before the tokio runtime
/// is built.
pub(crate) fn detach(log_file: &Path) -> Result<Detached, SupervisorError> {
    let (read_end, write_end) =
        pipe().map_err(|e| SupervisorError::Detach(format!("pipe failed: {e}")))?;

    // SAFETY: the process is single threaded at this point
    match unsafe { fork() }.map_err(|e| SupervisorError::Detach(format!("fork #1 failed: {e}")))? {
        ForkResult::Parent { child } => {
            drop(write_end);
            // the intermediate child exits right after the second fork
            let _ = waitpid(child, None);
            read_handshake(File::from(read_end))?;
            Ok(Detached::Invoker)
        }
        ForkResult::Child => {
            drop(read_end);
            let mut pipe = File::from(write_end);
            match become_daemon(log_file) {
                Ok(()) => Ok(Detached::Daemon(ReadyNotifier { pipe })),
                Err(reason) => {
                    let _ = pipe.write_all(reason.as_bytes());
                    std::process::exit(1);
                }
            }
        }
    }
}

fn become_daemon(log_file: &Path) -> Result<(), String> {
    setsid().map_err(|e| format!("setsid failed: {e}"))?;
    // SAFETY: still single threaded, we are the only thread of the first child
    match unsafe { fork() }.map_err(|e| format!("fork #2 failed: {e}"))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {
            redirect_stdio(log_file).map_err(|e| format!("could not redirect stdio: {e}"))
        }
    }
}

fn redirect_stdio(log_file: &Path) -> io::Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let log = OpenOptions::new().create(true).append(true).open(log_file)?;
    dup2(null.as_raw_fd(), io::stdin().as_raw_fd())?;
    dup2(null.as_raw_fd(), io::stdout().as_raw_fd())?;
    dup2(log.as_raw_fd(), io::stderr().as_raw_fd())?;
    Ok(())
}

pub(super) fn read_handshake(mut pipe: impl Read) -> Result<(), SupervisorError> {
    let mut message = String::new();
    pipe.read_to_string(&mut message)
        .map_err(|e| SupervisorError::Detach(format!("lost contact with the daemon: {e}")))?;
    match message.trim() {
        READY => Ok(()),
        "" => Err(SupervisorError::Detach(String::from(
            "the daemon exited during startup, check the logs",
        ))),
        reason => Err(SupervisorError::Detach(reason.to_string())),
    }
}
