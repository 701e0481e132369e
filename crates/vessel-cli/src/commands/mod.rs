//! CLI command definitions and dispatch.

pub mod exec;
pub mod init;
pub mod network;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vessel_common::config::VesselConfig;
use vessel_common::constants;

/// vessel: a minimal daemon-less container engine.
#[derive(Parser, Debug)]
#[command(name = "vessel", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory for container records and the network registry.
    #[arg(long, global = true, env = constants::RUN_DIR_ENV, default_value = constants::DEFAULT_RUN_DIR)]
    pub run_dir: PathBuf,

    /// Directory for images and container filesystems.
    #[arg(long, global = true, env = constants::DATA_DIR_ENV, default_value = constants::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Runtime configuration selected by the global flags.
    #[must_use]
    pub fn config(&self) -> VesselConfig {
        VesselConfig::new(&self.run_dir, &self.data_dir)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container with namespace and cgroup limits.
    Run(run::RunArgs),
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
    /// Manage container networks.
    Network(network::NetworkArgs),
    /// Container-side bootstrap; not meant to be called by hand.
    #[command(hide = true)]
    Init,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    tracing::debug!(
        run_dir = %config.run_dir.display(),
        data_dir = %config.data_dir.display(),
        "configuration resolved"
    );
    match cli.command {
        Command::Run(args) => run::execute(&config, args),
        Command::Exec(args) => exec::execute(&config, &args),
        Command::Network(args) => network::execute(&config, args),
        Command::Init => init::execute(),
    }
}
