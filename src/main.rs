use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{CommandFactory, Parser};
use cli::{Command, ConfigArgs, LogsArgs, RdstCli};
use daemon::{StartOutcome, StopOutcome, Supervisor};
use dialoguer::{Confirm, Input};
use logging::LogOutput;
use paths::Paths;
use probe::MySqlProber;
use secrets::{DEFAULT_REGION, aws::AwsSecretsManager};
use tracing::{error, info, warn};

mod cli;
mod config;
mod daemon;
mod logging;
mod paths;
mod probe;
mod secrets;
mod storage;
mod tunneling;

// The runtime is built per command: `start` has to fork before any runtime threads exist.
fn main() -> ExitCode {
    let cli = RdstCli::parse();
    let Some(paths) = Paths::from_home() else {
        eprintln!("could not determine the home directory");
        return ExitCode::FAILURE;
    };
    let output = match cli.command {
        Some(Command::TunnelWorker) => LogOutput::FileOnly,
        _ => LogOutput::FileAndConsole,
    };
    if let Err(e) = logging::init(&paths.log_file, output) {
        eprintln!("logging disabled: {e}");
    }

    let Some(command) = cli.command else {
        // help is best effort, there is nothing to do if stdout is gone
        let _ = RdstCli::command().print_help();
        return ExitCode::SUCCESS;
    };
    match command {
        Command::Start { config_file } => start(paths, config_file),
        Command::Stop => stop(paths),
        Command::Status => status(paths),
        Command::Config(args) => manage_config(&paths, args),
        Command::Logs(args) => manage_logs(&paths, args),
        Command::TunnelWorker => tunnel_worker(&paths),
    }
}

fn block_on<F: Future>(future: F) -> io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

fn start(paths: Paths, config_file: Option<PathBuf>) -> ExitCode {
    let config_file = paths.config_file_or(config_file.as_deref());
    let log_file = paths.log_file.clone();
    match Supervisor::new(paths).start(&config_file, &MySqlProber::new()) {
        Ok(StartOutcome::Detached) => {
            info!(target: "cli", "\nCheck tunnel status with:\n -$ rdst status");
            info!(target: "cli", "\nIf the tunnel is not active, check the logs.");
            info!(
                target: "cli",
                "\nLogs being written to: {}\nRun:\n -$ rdst logs --show",
                log_file.display()
            );
            ExitCode::SUCCESS
        }
        Ok(StartOutcome::DaemonExited) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "cli", "❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn stop(paths: Paths) -> ExitCode {
    match Supervisor::new(paths).stop() {
        Ok(StopOutcome::NotRunning) => {
            info!(target: "cli", "Tunnel is not running (state file not found).");
            ExitCode::SUCCESS
        }
        Ok(StopOutcome::AlreadyStopped(pid)) => {
            warn!(
                target: "cli",
                "Process with PID {pid} not found. It might have already stopped. Cleaning up state file."
            );
            ExitCode::SUCCESS
        }
        Ok(StopOutcome::Stopped(_)) => {
            info!(target: "cli", "Tunnel & DB Connection Terminated.");
            ExitCode::SUCCESS
        }
        Ok(StopOutcome::StillRunning(pid)) => {
            warn!(
                target: "cli",
                "Tunnel process {pid} is still shutting down, check again with `rdst status`."
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "cli", "❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn status(paths: Paths) -> ExitCode {
    let supervisor = Supervisor::new(paths);
    let report = match block_on(supervisor.status(&MySqlProber::new())) {
        Ok(report) => report,
        Err(e) => {
            error!(target: "cli", "❌ could not start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(target: "cli", "{report}");
    if report.is_conclusive() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn manage_config(paths: &Paths, args: ConfigArgs) -> ExitCode {
    let config_file = paths.config_file_or(args.config_file.as_deref());
    let result = if args.show {
        config::show(&config_file).map(|contents| {
            info!(target: "cli", "Current configuration in {}:", config_file.display());
            // printed, not logged: the file holds the database password
            println!("{contents}");
        })
    } else if args.clean {
        config::reset_to_default(&config_file).map(|()| {
            info!(target: "cli", "Configuration reset to default in {}", config_file.display());
        })
    } else {
        return fetch_config(&config_file, args.secret_name, args.region);
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "cli", "❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn fetch_config(
    config_file: &Path,
    secret_name: Option<String>,
    region: Option<String>,
) -> ExitCode {
    let (secret_name, region) = match prompt_missing(secret_name, region) {
        Ok(answers) => answers,
        Err(e) => {
            error!(target: "cli", "❌ could not read the answer: {e}");
            return ExitCode::FAILURE;
        }
    };

    let fetched = block_on(secrets::fetch_into(
        &AwsSecretsManager,
        &secret_name,
        &region,
        config_file,
    ));
    match fetched {
        Ok(Ok(keys)) => {
            tracing::debug!(target: "cli", "{keys} keys merged into the configuration");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(target: "cli", "❌ Failed to fetch or save secrets: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(target: "cli", "❌ could not start the async runtime: {e}");
            ExitCode::FAILURE
        }
    }
}

fn prompt_missing(
    secret_name: Option<String>,
    region: Option<String>,
) -> dialoguer::Result<(String, String)> {
    let secret_name = match secret_name {
        Some(secret_name) => secret_name,
        None => Input::<String>::new()
            .with_prompt("Enter the AWS Secrets Manager secret name")
            .interact_text()?,
    };
    let region = match region {
        Some(region) => region,
        None => Input::<String>::new()
            .with_prompt("Enter the AWS region")
            .default(DEFAULT_REGION.to_string())
            .interact_text()?,
    };
    Ok((secret_name, region))
}

fn manage_logs(paths: &Paths, args: LogsArgs) -> ExitCode {
    let log_file = &paths.log_file;
    if args.show {
        info!(target: "cli", "Displaying logs from: {}", log_file.display());
        return match block_on(logging::follow(log_file, &mut io::stdout())) {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(e)) => {
                error!(target: "cli", "❌ {e}");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!(target: "cli", "❌ could not start the async runtime: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let confirmed = args.yes
        || Confirm::new()
            .with_prompt(format!(
                "This action will delete all log entries in {}.\nAre you sure you want to clean the logs?",
                log_file.display()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);
    if !confirmed {
        info!(target: "cli", "Log cleaning cancelled.");
        return ExitCode::SUCCESS;
    }
    match logging::clean(log_file) {
        Ok(()) => {
            info!(target: "cli", "Cleaned log file: {}", log_file.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "cli", "❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn tunnel_worker(paths: &Paths) -> ExitCode {
    match block_on(tunneling::worker::run(&paths.known_hosts, tokio::io::stdin())) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(target: "tunnel", "❌ tunnel worker failed: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(target: "tunnel", "❌ could not start the async runtime: {e}");
            ExitCode::FAILURE
        }
    }
}
