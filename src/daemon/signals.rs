use std::{fmt, io};

use tokio::signal::unix::{Signal, SignalKind, signal};

/// Why the supervision loop (or the worker) is winding down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ShutdownReason {
    Terminated,
    Interrupted,
    /// something went wrong inside the loop itself
    Failed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Terminated => f.write_str("terminated"),
            ShutdownReason::Interrupted => f.write_str("interrupted"),
            ShutdownReason::Failed => f.write_str("failed"),
        }
    }
}

/// SIGTERM and SIGINT folded into a single cancellation signal.
pub(crate) struct Shutdown {
    terminate: Signal,
    interrupt: Signal,
}

impl Shutdown {
    /// Must be called from within a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Shutdown {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    pub async fn recv(&mut self) -> ShutdownReason {
        tokio::select! {
            _ = self.terminate.recv() => ShutdownReason::Terminated,
            _ = self.interrupt.recv() => ShutdownReason::Interrupted,
        }
    }
}
