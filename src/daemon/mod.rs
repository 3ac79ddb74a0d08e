//! The process supervisor: turns `rdst start` into a detached daemon that owns the
//! tunnel worker, and implements `stop` and `status` against its PID record.

pub(crate) mod detach;
pub(crate) mod pid_record;
pub(crate) mod signals;
mod worker_handle;

use std::{
    fmt,
    future::Future,
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{Signal, kill},
    unistd::{Pid, getpid},
};
use thiserror::Error;

use crate::{
    config::{ConfigError, TunnelConfig},
    paths::Paths,
    probe::Prober,
};
use detach::{Detached, ReadyNotifier};
use pid_record::{PidRecord, RecordGuard, RecordState};
use signals::{Shutdown, ShutdownReason};
use worker_handle::WorkerHandle;

/// time the forwarding session gets before the first probe
const GRACE_PERIOD: Duration = Duration::from_secs(2);
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("tunnel is already running with PID {0}")]
    AlreadyRunning(i32),
    #[error("could not detach from the terminal: {0}")]
    Detach(String),
    #[error("error reading state file {}, it might be corrupted: {}", .0.display(), .1)]
    CorruptRecord(PathBuf, String),
    #[error("could not find PID in state file {}", .0.display())]
    MissingPid(PathBuf),
    #[error("could not signal PID {0}: {1}")]
    Signal(i32, Errno),
    #[error("state file error: {0}")]
    State(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, PartialEq)]
pub(crate) enum StartOutcome {
    /// we are the invoker and the daemon reported that it is up
    Detached,
    /// we are the daemon and supervision is over
    DaemonExited,
}

#[derive(Debug, PartialEq)]
pub(crate) enum StopOutcome {
    NotRunning,
    /// the recorded process was already gone, its record has been removed
    AlreadyStopped(i32),
    Stopped(i32),
    /// signalled, but still alive when we stopped waiting
    StillRunning(i32),
}

#[derive(Debug, PartialEq)]
pub(crate) enum InactiveReason {
    NoRecord,
    UnreadableRecord,
    ProcessGone(i32),
}

#[derive(Debug, PartialEq)]
pub(crate) enum DatabaseStatus {
    Connected { local_port: u16 },
    Disconnected,
    /// the daemon's configuration could not be loaded
    Unknown(String),
}

#[derive(Debug, PartialEq)]
pub(crate) enum StatusReport {
    Inactive(InactiveReason),
    Active { pid: i32, database: DatabaseStatus },
}

impl StatusReport {
    /// `status` fails when it could not establish one of the two facts it reports.
    pub fn is_conclusive(&self) -> bool {
        !matches!(
            self,
            StatusReport::Inactive(InactiveReason::UnreadableRecord)
                | StatusReport::Active {
                    database: DatabaseStatus::Unknown(_),
                    ..
                }
        )
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReport::Inactive(InactiveReason::NoRecord) => write!(f, "Tunnel: Inactive"),
            StatusReport::Inactive(InactiveReason::UnreadableRecord) => {
                write!(f, "Tunnel: Inactive (Could not read state file)")
            }
            StatusReport::Inactive(InactiveReason::ProcessGone(_)) => {
                write!(f, "Tunnel: Inactive (Process not found)")
            }
            StatusReport::Active { database, .. } => {
                writeln!(f, "Tunnel: Active")?;
                match database {
                    DatabaseStatus::Connected { local_port } => write!(
                        f,
                        "Database: Connected\n  - Bound to: 127.0.0.1:{local_port}"
                    ),
                    DatabaseStatus::Disconnected => write!(f, "Database: Disconnected"),
                    DatabaseStatus::Unknown(reason) => {
                        write!(f, "Database: Unknown (Could not load config: {reason})")
                    }
                }
            }
        }
    }
}

pub(crate) struct Supervisor {
    paths: Paths,
    grace_period: Duration,
    stop_timeout: Duration,
}

impl Supervisor {
    pub fn new(paths: Paths) -> Self {
        Supervisor {
            paths,
            grace_period: GRACE_PERIOD,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    /// Refuses to start over a live daemon and clears a stale record.
    pub fn preflight(&self) -> Result<(), SupervisorError> {
        let state_file = &self.paths.state_file;
        match pid_record::read(state_file) {
            RecordState::Absent => Ok(()),
            RecordState::Present(record) if pid_record::process_alive(record.pid) => {
                Err(SupervisorError::AlreadyRunning(record.pid))
            }
            stale => {
                tracing::debug!(target: "supervisor", "found stale state file ({stale:?}), cleaning up");
                pid_record::remove(state_file)?;
                Ok(())
            }
        }
    }

    /// Loads the configuration, detaches and, in the daemon, supervises the tunnel worker
    /// until a termination request arrives. Both processes return from this call.
    pub fn start(
        &self,
        config_file: &Path,
        prober: &dyn Prober,
    ) -> Result<StartOutcome, SupervisorError> {
        self.preflight()?;
        let config = TunnelConfig::load(config_file)?;
        let config_file = std::path::absolute(config_file)?;

        tracing::info!(target: "supervisor", "Starting tunnel in daemon mode...");
        let ready = match detach::detach(&self.paths.log_file)? {
            Detached::Invoker => return Ok(StartOutcome::Detached),
            Detached::Daemon(ready) => ready,
        };

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                ready.failed(&format!("could not start the async runtime: {e}"));
                return Err(e.into());
            }
        };
        runtime.block_on(async {
            let mut shutdown = match Shutdown::install() {
                Ok(shutdown) => shutdown,
                Err(e) => {
                    ready.failed(&format!("could not install signal handlers: {e}"));
                    return Err(e.into());
                }
            };
            self.supervise(
                config,
                config_file,
                ready,
                prober,
                worker_handle::worker_command,
                shutdown.recv(),
            )
            .await
        })?;
        Ok(StartOutcome::DaemonExited)
    }

    /// The daemon's life after detaching: record, worker, probe, then wait for `shutdown`.
    /// The worker is always gone before the record is removed.
    async fn supervise(
        &self,
        config: TunnelConfig,
        config_file: PathBuf,
        ready: ReadyNotifier,
        prober: &dyn Prober,
        worker_command: impl FnOnce() -> io::Result<tokio::process::Command>,
        shutdown: impl Future<Output = ShutdownReason>,
    ) -> Result<(), SupervisorError> {
        tokio::pin!(shutdown);
        let record = PidRecord {
            pid: getpid().as_raw(),
            config_file: Some(config_file),
        };
        if let Err(e) = pid_record::write(&self.paths.state_file, &record) {
            ready.failed(&format!(
                "could not write {}: {e}",
                self.paths.state_file.display()
            ));
            return Err(e.into());
        }
        // dropped last, after the worker is gone
        let _record_guard = RecordGuard::new(&self.paths.state_file);
        ready.ready();
        tracing::info!(target: "supervisor", "daemon running with PID {}", record.pid);

        let spawned = match worker_command() {
            Ok(command) => WorkerHandle::spawn(command, &config).await,
            Err(e) => Err(e),
        };
        let mut worker = match spawned {
            Ok(worker) => {
                tracing::info!(
                    target: "supervisor",
                    "Tunnel process started (PID {}). Waiting {} seconds for connection to establish...",
                    worker.id().unwrap_or_default(),
                    self.grace_period.as_secs()
                );
                Some(worker)
            }
            Err(e) => {
                tracing::error!(target: "supervisor", "could not spawn the tunnel worker: {e}");
                None
            }
        };

        let early_exit = tokio::select! {
            reason = &mut shutdown => Some(reason),
            _ = async {
                tokio::time::sleep(self.grace_period).await;
                tracing::debug!(target: "supervisor", "testing DB connection...");
                prober.probe(&config).await;
            } => None,
        };
        let reason = match early_exit {
            Some(reason) => reason,
            None => {
                tracing::info!(
                    target: "supervisor",
                    "Tunnel is active. The daemon keeps running in the background to keep the tunnel alive."
                );
                wait_for_shutdown(&mut shutdown, &mut worker).await
            }
        };
        tracing::warn!(target: "supervisor", "⏹️  {reason}, shutting down");

        if let Some(worker) = worker.as_mut() {
            match worker.terminate(WORKER_JOIN_TIMEOUT).await {
                Ok(Some(status)) => {
                    tracing::info!(target: "supervisor", "tunnel worker stopped ({status})")
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(target: "supervisor", "could not stop the tunnel worker: {e}")
                }
            }
        }
        Ok(())
    }

    /// Asks the daemon to terminate and waits (bounded) for it to go away.
    pub fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let state_file = &self.paths.state_file;
        let record = match pid_record::read(state_file) {
            RecordState::Absent => return Ok(StopOutcome::NotRunning),
            RecordState::Corrupt(reason) => {
                return Err(SupervisorError::CorruptRecord(state_file.clone(), reason));
            }
            RecordState::MissingPid => return Err(SupervisorError::MissingPid(state_file.clone())),
            RecordState::Present(record) => record,
        };
        let pid = record.pid;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Err(Errno::ESRCH) => {
                pid_record::remove(state_file)?;
                return Ok(StopOutcome::AlreadyStopped(pid));
            }
            Err(e) => return Err(SupervisorError::Signal(pid, e)),
            Ok(()) => {
                tracing::info!(target: "supervisor", "Sent stop signal to tunnel process with PID {pid}.")
            }
        }

        let deadline = Instant::now() + self.stop_timeout;
        while Instant::now() < deadline {
            if !pid_record::process_alive(pid) {
                // the daemon removes its own record, this only covers a daemon that died hard
                pid_record::remove(state_file)?;
                return Ok(StopOutcome::Stopped(pid));
            }
            thread::sleep(STOP_POLL);
        }
        Ok(StopOutcome::StillRunning(pid))
    }

    pub async fn status(&self, prober: &dyn Prober) -> StatusReport {
        let state_file = &self.paths.state_file;
        let record = match pid_record::read(state_file) {
            RecordState::Absent => return StatusReport::Inactive(InactiveReason::NoRecord),
            RecordState::Corrupt(_) | RecordState::MissingPid => {
                remove_stale(state_file);
                return StatusReport::Inactive(InactiveReason::UnreadableRecord);
            }
            RecordState::Present(record) => record,
        };
        if !pid_record::process_alive(record.pid) {
            remove_stale(state_file);
            return StatusReport::Inactive(InactiveReason::ProcessGone(record.pid));
        }

        let Some(config_file) = record.config_file else {
            return StatusReport::Active {
                pid: record.pid,
                database: DatabaseStatus::Unknown(String::from("no config_file recorded")),
            };
        };
        let database = match TunnelConfig::load(&config_file) {
            Err(e) => DatabaseStatus::Unknown(e.to_string()),
            Ok(config) if prober.probe(&config).await => DatabaseStatus::Connected {
                local_port: config.local_port,
            },
            Ok(_) => DatabaseStatus::Disconnected,
        };
        StatusReport::Active {
            pid: record.pid,
            database,
        }
    }
}

/// Blocks until a termination request arrives, noting (once) if the worker dies meanwhile.
async fn wait_for_shutdown(
    shutdown: impl Future<Output = ShutdownReason>,
    worker: &mut Option<WorkerHandle>,
) -> ShutdownReason {
    tokio::pin!(shutdown);
    loop {
        let Some(handle) = worker.as_mut().filter(|w| !w.has_exited()) else {
            return shutdown.await;
        };
        tokio::select! {
            reason = &mut shutdown => return reason,
            status = handle.wait() => match status {
                Ok(status) => tracing::error!(
                    target: "supervisor",
                    "tunnel worker exited ({status}), the tunnel stays down until the daemon is restarted"
                ),
                Err(e) => {
                    tracing::error!(target: "supervisor", "lost track of the tunnel worker: {e}");
                    return ShutdownReason::Failed;
                }
            },
        }
    }
}

fn remove_stale(state_file: &Path) {
    if let Err(e) = pid_record::remove(state_file) {
        tracing::warn!(target: "supervisor", "could not remove stale {}: {e}", state_file.display());
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;
    use crate::probe::MockProber;
    use pid_record::tests::DEAD_PID;
    use tempfile::TempDir;

    const SCENARIO: &str = r#"{"SSH_HOST": "bastion", "SSH_USER": "u", "SSH_PRIVATE_KEY_PATH": "/k",
        "DB_HOST": "db", "DB_PORT": 5432, "DB_USER": "a", "DB_PASSWORD": "p", "DB_NAME": "app",
        "LOCAL_PORT": 15432}"#;

    fn supervisor(dir: &TempDir) -> Supervisor {
        Supervisor {
            paths: Paths::rooted_at(dir.path()),
            grace_period: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(5),
        }
    }

    fn record(dir: &TempDir, pid: i32) -> PidRecord {
        let config_file = dir.path().join("config.json");
        std::fs::write(&config_file, SCENARIO).unwrap();
        let record = PidRecord {
            pid,
            config_file: Some(config_file),
        };
        pid_record::write(&Paths::rooted_at(dir.path()).state_file, &record).unwrap();
        record
    }

    fn own_pid() -> i32 {
        getpid().as_raw()
    }

    fn prober_returning(reachable: bool) -> MockProber {
        let mut prober = MockProber::new();
        prober.expect_probe().returning(move |_| reachable);
        prober
    }

    #[test]
    fn preflight_refuses_a_live_daemon() {
        let dir = TempDir::new().unwrap();
        record(&dir, own_pid());
        let supervisor = supervisor(&dir);
        assert!(matches!(
            supervisor.preflight(),
            Err(SupervisorError::AlreadyRunning(pid)) if pid == own_pid()
        ));
        // nothing was touched
        assert!(supervisor.paths.state_file.exists());
    }

    #[test]
    fn start_refuses_a_live_daemon_before_loading_config() {
        let dir = TempDir::new().unwrap();
        record(&dir, own_pid());
        let supervisor = supervisor(&dir);
        let result = supervisor.start(&dir.path().join("missing.json"), &MockProber::new());
        assert!(matches!(result, Err(SupervisorError::AlreadyRunning(_))));
    }

    #[test]
    fn start_reports_config_failures_before_detaching() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        let config_file = dir.path().join("broken.json");
        std::fs::write(&config_file, "{ nope").unwrap();
        let result = supervisor.start(&config_file, &MockProber::new());
        assert!(matches!(result, Err(SupervisorError::Config(ConfigError::Parse(_)))));
        assert!(!supervisor.paths.state_file.exists());
    }

    #[test]
    fn preflight_clears_stale_records() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        record(&dir, DEAD_PID);
        supervisor.preflight().unwrap();
        assert!(!supervisor.paths.state_file.exists());

        std::fs::write(&supervisor.paths.state_file, "garbage").unwrap();
        supervisor.preflight().unwrap();
        assert!(!supervisor.paths.state_file.exists());

        supervisor.preflight().unwrap();
    }

    #[test]
    fn stop_without_record_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
    }

    #[test]
    fn stop_cleans_up_after_a_vanished_process() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        record(&dir, DEAD_PID);
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::AlreadyStopped(DEAD_PID));
        assert!(!supervisor.paths.state_file.exists());
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
    }

    #[test]
    fn stop_refuses_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        std::fs::write(&supervisor.paths.state_file, "{ nope").unwrap();
        assert!(matches!(
            supervisor.stop(),
            Err(SupervisorError::CorruptRecord(..))
        ));
        assert!(supervisor.paths.state_file.exists());

        std::fs::write(&supervisor.paths.state_file, r#"{"config_file": "/c.json"}"#).unwrap();
        assert!(matches!(supervisor.stop(), Err(SupervisorError::MissingPid(_))));
    }

    #[test]
    fn stop_terminates_the_recorded_process() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        let mut daemon = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = i32::try_from(daemon.id()).unwrap();
        record(&dir, pid);
        // reap it as soon as it dies so it does not linger as a zombie
        let reaper = thread::spawn(move || daemon.wait().unwrap());

        assert_eq!(supervisor.stop().unwrap(), StopOutcome::Stopped(pid));
        assert!(!reaper.join().unwrap().success());
        assert!(!supervisor.paths.state_file.exists());
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn status_without_record() {
        let dir = TempDir::new().unwrap();
        let report = supervisor(&dir).status(&MockProber::new()).await;
        assert_eq!(report, StatusReport::Inactive(InactiveReason::NoRecord));
        assert_eq!(report.to_string(), "Tunnel: Inactive");
    }

    #[tokio::test]
    async fn status_clears_stale_records() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        record(&dir, DEAD_PID);
        let report = supervisor.status(&MockProber::new()).await;
        assert_eq!(
            report,
            StatusReport::Inactive(InactiveReason::ProcessGone(DEAD_PID))
        );
        assert!(!supervisor.paths.state_file.exists());

        std::fs::write(&supervisor.paths.state_file, "garbage").unwrap();
        let report = supervisor.status(&MockProber::new()).await;
        assert_eq!(report, StatusReport::Inactive(InactiveReason::UnreadableRecord));
        assert!(!report.is_conclusive());
        assert!(!supervisor.paths.state_file.exists());
    }

    #[tokio::test]
    async fn status_reports_a_reachable_database() {
        let dir = TempDir::new().unwrap();
        record(&dir, own_pid());
        let report = supervisor(&dir).status(&prober_returning(true)).await;
        assert_eq!(
            report,
            StatusReport::Active {
                pid: own_pid(),
                database: DatabaseStatus::Connected { local_port: 15432 },
            }
        );
        assert_eq!(
            report.to_string(),
            "Tunnel: Active\nDatabase: Connected\n  - Bound to: 127.0.0.1:15432"
        );
    }

    #[tokio::test]
    async fn tunnel_liveness_and_database_reachability_are_independent() {
        let dir = TempDir::new().unwrap();
        record(&dir, own_pid());
        let mut prober = MockProber::new();
        prober
            .expect_probe()
            .withf(|config| config.local_port == 15432 && config.db_port == 5432)
            .times(1)
            .returning(|_| false);
        let report = supervisor(&dir).status(&prober).await;
        assert_eq!(
            report,
            StatusReport::Active {
                pid: own_pid(),
                database: DatabaseStatus::Disconnected,
            }
        );
        assert!(report.is_conclusive());
        assert_eq!(report.to_string(), "Tunnel: Active\nDatabase: Disconnected");
    }

    #[tokio::test]
    async fn unloadable_config_keeps_the_tunnel_active() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        let record = record(&dir, own_pid());
        std::fs::write(record.config_file.unwrap(), "{ nope").unwrap();
        let report = supervisor.status(&MockProber::new()).await;
        assert!(matches!(
            report,
            StatusReport::Active {
                database: DatabaseStatus::Unknown(_),
                ..
            }
        ));
        assert!(!report.is_conclusive());
        assert!(report.to_string().starts_with("Tunnel: Active\nDatabase: Unknown"));
        assert!(supervisor.paths.state_file.exists());
    }

    async fn wait_for_file(path: &Path) -> String {
        for _ in 0..100 {
            if let Ok(contents) = std::fs::read_to_string(path) {
                if !contents.is_empty() {
                    return contents;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never showed up", path.display());
    }

    #[tokio::test]
    async fn supervision_records_itself_and_stops_the_worker_before_forgetting() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        let state_file = supervisor.paths.state_file.clone();
        let config_file = dir.path().join("config.json");
        std::fs::write(&config_file, SCENARIO).unwrap();
        let config = TunnelConfig::load(&config_file).unwrap();

        let handshake = dir.path().join("handshake");
        let ready = ReadyNotifier::to_file(std::fs::File::create(&handshake).unwrap());
        let payload = dir.path().join("payload.json");
        let worker_pid = dir.path().join("worker.pid");
        let order = dir.path().join("order");
        // on SIGTERM the stand-in worker notes whether the record still exists
        let script = format!(
            "trap 'if [ -e \"{state}\" ]; then echo recorded > \"{order}\"; fi; exit 0' TERM; \
             cat > \"{payload}\"; echo $$ > \"{pid}\"; while :; do sleep 0.1; done",
            state = state_file.display(),
            order = order.display(),
            payload = payload.display(),
            pid = worker_pid.display(),
        );
        let worker_command = move || {
            let mut command = tokio::process::Command::new("sh");
            command.arg("-c").arg(script);
            Ok(command)
        };

        let mut prober = MockProber::new();
        prober
            .expect_probe()
            .withf(|config| config.local_port == 15432)
            .times(1)
            .returning(|_| false);
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

        let supervising = supervisor.supervise(
            config,
            config_file.clone(),
            ready,
            &prober,
            worker_command,
            async {
                let _ = stopped.await;
                ShutdownReason::Terminated
            },
        );
        let observing = async {
            let worker_pid: i32 = wait_for_file(&worker_pid).await.trim().parse().unwrap();
            detach::read_handshake(std::fs::File::open(&handshake).unwrap()).unwrap();
            assert_eq!(
                pid_record::read(&state_file),
                RecordState::Present(PidRecord {
                    pid: own_pid(),
                    config_file: Some(config_file.clone()),
                })
            );
            let forwarded: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&payload).unwrap()).unwrap();
            assert_eq!(forwarded["LOCAL_PORT"], 15432);
            // past the grace period, so the probe has run
            tokio::time::sleep(Duration::from_millis(300)).await;
            stop.send(()).unwrap();
            worker_pid
        };
        let (supervised, worker_pid) = tokio::join!(supervising, observing);

        supervised.unwrap();
        assert!(!state_file.exists());
        assert_eq!(std::fs::read_to_string(&order).unwrap().trim(), "recorded");
        assert!(!pid_record::process_alive(worker_pid));
    }

    #[tokio::test]
    async fn unspawnable_worker_still_leaves_no_record_behind() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        let config_file = dir.path().join("config.json");
        std::fs::write(&config_file, SCENARIO).unwrap();
        let config = TunnelConfig::load(&config_file).unwrap();
        let handshake = dir.path().join("handshake");
        let ready = ReadyNotifier::to_file(std::fs::File::create(&handshake).unwrap());

        supervisor
            .supervise(
                config,
                config_file,
                ready,
                &MockProber::new(),
                || Err(io::Error::other("no such executable")),
                async { ShutdownReason::Interrupted },
            )
            .await
            .unwrap();
        detach::read_handshake(std::fs::File::open(&handshake).unwrap()).unwrap();
        assert!(!supervisor.paths.state_file.exists());
    }

    #[tokio::test]
    async fn pid_without_config_path_still_counts_as_running() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        std::fs::write(
            &supervisor.paths.state_file,
            format!(r#"{{"pid": {}}}"#, own_pid()),
        )
        .unwrap();

        assert!(matches!(
            supervisor.preflight(),
            Err(SupervisorError::AlreadyRunning(pid)) if pid == own_pid()
        ));
        let report = supervisor.status(&MockProber::new()).await;
        assert!(matches!(
            report,
            StatusReport::Active {
                database: DatabaseStatus::Unknown(_),
                ..
            }
        ));
        assert!(supervisor.paths.state_file.exists());
    }

    #[test]
    fn stop_needs_only_the_pid() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir);
        let mut daemon = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = i32::try_from(daemon.id()).unwrap();
        std::fs::write(&supervisor.paths.state_file, format!(r#"{{"pid": {pid}}}"#)).unwrap();
        let reaper = thread::spawn(move || daemon.wait().unwrap());

        assert_eq!(supervisor.stop().unwrap(), StopOutcome::Stopped(pid));
        assert!(!reaper.join().unwrap().success());
        assert!(!supervisor.paths.state_file.exists());
    }

    #[test]
    fn corrupt_record_error_names_the_file() {
        let err = SupervisorError::CorruptRecord(
            PathBuf::from("/home/u/.rdstunnel.state"),
            String::from("eof"),
        );
        assert_eq!(
            err.to_string(),
            "error reading state file /home/u/.rdstunnel.state, it might be corrupted: eof"
        );
    }

    #[tokio::test]
    async fn dead_worker_does_not_end_supervision() {
        let mut worker = Some(
            WorkerHandle::spawn_command(
                {
                    let mut command = tokio::process::Command::new("sh");
                    command.arg("-c").arg("cat > /dev/null; exit 3");
                    command
                },
                b"",
            )
            .await
            .unwrap(),
        );
        let waiting = wait_for_shutdown(std::future::pending(), &mut worker);
        // the worker exits immediately, yet the loop keeps waiting for a signal
        let result = tokio::time::timeout(Duration::from_millis(500), waiting).await;
        assert!(result.is_err());
        assert!(worker.unwrap().has_exited());
    }

    #[tokio::test]
    async fn shutdown_request_ends_supervision() {
        let mut worker = None;
        let reason = wait_for_shutdown(async { ShutdownReason::Interrupted }, &mut worker).await;
        assert_eq!(reason, ShutdownReason::Interrupted);
    }
}
