//! Runner for the iproute2 and iptables helper programs.
//!
//! Link, address, route, and NAT changes are made by invoking `ip` and
//! `iptables`. A child spawned from a thread that has switched network
//! namespace runs in that namespace, which is what lets the endpoint
//! configurator reuse the same runner inside a container.

use std::process::Command;

use vessel_common::error::{Result, VesselError};

/// Executes external programs on behalf of drivers and configurators.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be found or started, or if it
    /// exits unsuccessfully.
    fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Runs programs found on the host `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let path = which::which(program).map_err(|_| VesselError::NotFound {
            kind: "executable",
            id: program.to_owned(),
        })?;
        tracing::debug!(program, ?args, "running helper");

        let output = Command::new(&path)
            .args(args)
            .output()
            .map_err(|e| VesselError::io(&path, e))?;

        if !output.status.success() {
            return Err(VesselError::Command {
                program: render(program, args),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runs `ip` with the given arguments.
///
/// # Errors
///
/// See [`CommandRunner::run`].
pub fn ip<S: AsRef<str>>(runner: &dyn CommandRunner, args: &[S]) -> Result<String> {
    runner.run("ip", &owned(args))
}

/// Runs `iptables` with the given arguments.
///
/// # Errors
///
/// See [`CommandRunner::run`].
pub fn iptables<S: AsRef<str>>(runner: &dyn CommandRunner, args: &[S]) -> Result<String> {
    runner.run("iptables", &owned(args))
}

fn owned<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter().map(|a| a.as_ref().to_owned()).collect()
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Mutex;

    use super::*;

    /// Records every invocation and fails those containing `fail_on`.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingRunner {
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) fail_on: Option<String>,
    }

    impl RecordingRunner {
        pub(crate) fn failing_on(pattern: &str) -> Self {
            Self {
                calls: Mutex::default(),
                fail_on: Some(pattern.to_owned()),
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<String> {
            let line = render(program, args);
            self.calls.lock().unwrap().push(line.clone());
            match &self.fail_on {
                Some(pattern) if line.contains(pattern.as_str()) => Err(VesselError::Command {
                    program: line,
                    status: "exit status: 2".into(),
                    stderr: "simulated failure".into(),
                }),
                _ => Ok(String::new()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_not_found() {
        let err = SystemRunner
            .run("vessel-no-such-helper", &[])
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn failing_program_reports_command_error() {
        let err = SystemRunner.run("false", &[]).unwrap_err();
        assert!(matches!(err, VesselError::Command { ref program, .. } if program == "false"));
    }

    #[test]
    fn successful_program_returns_stdout() {
        let out = SystemRunner
            .run("echo", &["bridge".to_owned()])
            .unwrap();
        assert_eq!(out.trim(), "bridge");
    }
}
