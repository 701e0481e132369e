//! `vessel exec`: run a command inside a running container.

use clap::Args;
use vessel_common::config::VesselConfig;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub name: String,

    /// Command and arguments to execute.
    #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command, exiting with the command's status.
///
/// # Errors
///
/// Returns an error if the container is unknown or not running.
pub fn execute(config: &VesselConfig, args: &ExecArgs) -> anyhow::Result<()> {
    let code = vessel_runtime::exec::exec_in_container(config, &args.name, &args.command)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
