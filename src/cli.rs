use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

/// name of the hidden subcommand the supervisor re-executes itself with
pub const WORKER_COMMAND: &str = "tunnel-worker";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "rdst keeps an SSH tunnel to your RDS database alive in the background",
    long_about = None
)]
pub(crate) struct RdstCli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub(crate) enum Command {
    /// Start the RDS tunnel daemon
    Start {
        /// custom configuration file
        #[arg(long)]
        config_file: Option<PathBuf>,
    },
    /// Stop the RDS tunnel daemon
    Stop,
    /// Check the status of the RDS tunnel
    Status,
    /// Manage configuration
    Config(ConfigArgs),
    /// Show or clean logs
    Logs(LogsArgs),
    #[command(name = WORKER_COMMAND, hide = true)]
    TunnelWorker,
}

#[derive(Args, Debug, PartialEq)]
#[command(group(ArgGroup::new("action").required(true).args(["fetch", "show", "clean"])))]
pub(crate) struct ConfigArgs {
    /// Fetch configuration from AWS Secrets Manager
    #[arg(long)]
    pub fetch: bool,
    /// Show the current configuration
    #[arg(long)]
    pub show: bool,
    /// Reset the configuration to default
    #[arg(long)]
    pub clean: bool,
    /// secret to fetch, prompted for when missing
    #[arg(long, conflicts_with_all = ["show", "clean"])]
    pub secret_name: Option<String>,
    /// AWS region of the secret, prompted for when missing
    #[arg(long, conflicts_with_all = ["show", "clean"])]
    pub region: Option<String>,
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

#[derive(Args, Debug, PartialEq)]
#[command(group(ArgGroup::new("action").required(true).args(["show", "clean"])))]
pub(crate) struct LogsArgs {
    /// Show the current logs and keep following them
    #[arg(long)]
    pub show: bool,
    /// Clean the logs (THIS WILL EMPTY THE LOGS FILE)
    #[arg(long)]
    pub clean: bool,
    /// do not ask for confirmation
    #[arg(long, short, conflicts_with = "show")]
    pub yes: bool,
}
