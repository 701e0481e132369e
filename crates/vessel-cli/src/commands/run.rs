//! `vessel run`: start a container.

use clap::Args;
use vessel_common::config::VesselConfig;
use vessel_common::types::ResourceConfig;
use vessel_runtime::container::{self, RunOptions, RunOutcome};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach to the terminal and wait for the container to exit.
    #[arg(long = "ti", conflicts_with = "detach")]
    pub tty: bool,

    /// Run in the background, output captured to the container log.
    #[arg(short, long)]
    pub detach: bool,

    /// Memory limit, written verbatim (e.g. `100m`).
    #[arg(short, long, default_value = "")]
    pub memory: String,

    /// Relative CPU weight.
    #[arg(long, default_value = "")]
    pub cpushare: String,

    /// CPUs the container may run on (e.g. `0-1`).
    #[arg(long, default_value = "")]
    pub cpuset: String,

    /// Container name; defaults to the generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Volume as `/host/dir:/container/dir`.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Environment entry `KEY=VALUE`; repeatable.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Network to connect the container to.
    #[arg(long)]
    pub net: Option<String>,

    /// Port mapping `hostPort:containerPort`; repeatable.
    #[arg(short, long = "port")]
    pub port: Vec<String>,

    /// Image directory name.
    pub image: String,

    /// Command and arguments to execute.
    #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            tty: self.tty,
            image: self.image,
            command: self.command,
            name: self.name,
            resources: ResourceConfig {
                memory_limit: self.memory,
                cpu_share: self.cpushare,
                cpu_set: self.cpuset,
            },
            volume: self.volume,
            env: self.env,
            network: self.net,
            port_mapping: self.port,
        }
    }
}

/// Executes the `run` command.
///
/// Detached runs print the container id; interactive runs exit with the
/// container's status.
///
/// # Errors
///
/// Returns an error if the container cannot be started.
pub fn execute(config: &VesselConfig, args: RunArgs) -> anyhow::Result<()> {
    match container::run(config, &args.into_options())? {
        RunOutcome::Detached(info) => {
            println!("{}", info.id);
            Ok(())
        }
        RunOutcome::Exited { code: 0, .. } => Ok(()),
        RunOutcome::Exited { code, .. } => std::process::exit(code),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::commands::{Cli, Command};

    use super::*;

    fn parse(args: &[&str]) -> Result<RunArgs, clap::Error> {
        let cli = Cli::try_parse_from(std::iter::once("vessel").chain(args.iter().copied()))?;
        match cli.command {
            Command::Run(run) => Ok(run),
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn flags_map_onto_run_options() {
        let args = parse(&[
            "run", "--ti", "-m", "100m", "--cpushare", "512", "--cpuset", "0-1", "--name", "web",
            "-v", "/srv:/data", "-e", "A=1", "-e", "B=2", "--net", "testbridge", "-p", "8080:80",
            "busybox", "top", "-b",
        ])
        .unwrap();
        let opts = args.into_options();

        assert!(opts.tty);
        assert_eq!(opts.image, "busybox");
        assert_eq!(opts.command, vec!["top", "-b"]);
        assert_eq!(opts.name.as_deref(), Some("web"));
        assert_eq!(opts.resources.memory_limit, "100m");
        assert_eq!(opts.resources.cpu_share, "512");
        assert_eq!(opts.resources.cpu_set, "0-1");
        assert_eq!(opts.volume.as_deref(), Some("/srv:/data"));
        assert_eq!(opts.env, vec!["A=1", "B=2"]);
        assert_eq!(opts.network.as_deref(), Some("testbridge"));
        assert_eq!(opts.port_mapping, vec!["8080:80"]);
    }

    #[test]
    fn tty_and_detach_conflict() {
        let err = parse(&["run", "--ti", "-d", "busybox", "sh"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn command_is_required() {
        assert!(parse(&["run", "busybox"]).is_err());
    }

    #[test]
    fn limits_default_to_unconstrained() {
        let opts = parse(&["run", "-d", "busybox", "top"]).unwrap().into_options();
        assert!(!opts.tty);
        assert!(opts.resources.is_unconstrained());
    }
}
