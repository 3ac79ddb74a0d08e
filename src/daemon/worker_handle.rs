use std::{io, process::ExitStatus, process::Stdio, time::Duration};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tokio::{io::AsyncWriteExt, process::Child, process::Command};

use crate::{cli::WORKER_COMMAND, config::TunnelConfig};

/// The supervisor's handle on the tunnel worker process.
pub(crate) struct WorkerHandle {
    child: Child,
    exited: Option<ExitStatus>,
}

/// `rdst tunnel-worker`: ourselves, re-executed as the worker.
pub(crate) fn worker_command() -> io::Result<Command> {
    let mut command = Command::new(std::env::current_exe()?);
    command.arg(WORKER_COMMAND);
    Ok(command)
}

impl WorkerHandle {
    /// Starts `command` and hands it the configuration on stdin.
    pub async fn spawn(command: Command, config: &TunnelConfig) -> io::Result<Self> {
        let payload = config.to_json().map_err(io::Error::other)?;
        WorkerHandle::spawn_command(command, &payload).await
    }

    pub async fn spawn_command(mut command: Command, payload: &[u8]) -> io::Result<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload).await?;
            // dropping stdin closes it, which is the end-of-config marker
        }
        Ok(WorkerHandle {
            child,
            exited: None,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_some()
    }

    pub fn is_alive(&mut self) -> bool {
        if self.exited.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exited = Some(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exited {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.exited = Some(status);
        Ok(status)
    }

    /// SIGTERM, then up to `grace` for the worker to exit, then SIGKILL.
    /// Returns `None` if the worker was already gone.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<Option<ExitStatus>> {
        if !self.is_alive() {
            return Ok(None);
        }
        if let Some(pid) = self.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::warn!(target: "supervisor", "could not signal tunnel worker {pid}: {e}");
            }
        }
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => {
                tracing::warn!(
                    target: "supervisor",
                    "tunnel worker did not exit within {grace:?}, killing it"
                );
                self.child.kill().await?;
                self.wait().await.map(Some)
            }
        }
    }
}
