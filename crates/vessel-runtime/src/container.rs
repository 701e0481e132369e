//! Container start orchestration.
//!
//! A start runs in a fixed order: prepare the root filesystem, clone the
//! init process (blocked on its pipe), record it, bound it with cgroups,
//! wire its network, and only then release it to execute the command. A
//! failure after the clone kills the child and undoes every step already
//! taken.

use vessel_common::config::VesselConfig;
use vessel_common::error::{Result, VesselError};
use vessel_common::types::{ContainerId, ContainerInfo, ContainerStatus, ResourceConfig};
use vessel_core::cgroup::CgroupManager;
use vessel_core::namespace::NamespaceConfig;
use vessel_core::process::{self, BootstrapConfig, InitPayload};
use vessel_net::manager::NetworkManager;

use crate::state;
use crate::workspace::Workspace;

/// Everything `vessel run` needs to start a container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Attach the container to the caller's terminal and wait for it.
    pub tty: bool,
    /// Image directory name under `<data_dir>/images`.
    pub image: String,
    /// Command and arguments to execute.
    pub command: Vec<String>,
    /// Container name; defaults to the generated id.
    pub name: Option<String>,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Optional `host:container` volume.
    pub volume: Option<String>,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Network to connect to.
    pub network: Option<String>,
    /// `hostPort:containerPort` mappings, applied when a network is given.
    pub port_mapping: Vec<String>,
}

impl RunOptions {
    /// Checks the options before anything is created.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Config`] for an empty command, an invalid
    /// name, or an environment entry without `=`.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(VesselError::Config {
                message: "missing container command".into(),
            });
        }
        if let Some(name) = &self.name {
            if name.is_empty() || name == "." || name == ".." || name.contains('/') {
                return Err(VesselError::Config {
                    message: format!("invalid container name {name:?}"),
                });
            }
        }
        if let Some(bad) = self.env.iter().find(|e| !e.contains('=')) {
            return Err(VesselError::Config {
                message: format!("environment entry {bad:?} is not KEY=VALUE"),
            });
        }
        if self.network.is_none() && !self.port_mapping.is_empty() {
            tracing::warn!("port mappings ignored without a network");
        }
        Ok(())
    }
}

/// How a started container ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container keeps running in the background.
    Detached(ContainerInfo),
    /// The interactive container exited and was torn down.
    Exited {
        /// Final record of the container.
        info: ContainerInfo,
        /// Exit code of the init process.
        code: i32,
    },
}

impl RunOutcome {
    /// Record of the container.
    #[must_use]
    pub fn info(&self) -> &ContainerInfo {
        match self {
            Self::Detached(info) | Self::Exited { info, .. } => info,
        }
    }
}

/// Resources held by one started container.
struct Container<'a> {
    config: &'a VesselConfig,
    info: ContainerInfo,
    workspace: Workspace,
    cgroup: CgroupManager,
    network: Option<(NetworkManager, String)>,
    connected: bool,
}

impl Container<'_> {
    /// Records the container, bounds it, and connects it, in that order.
    fn wire(&mut self, resources: &ResourceConfig) -> Result<()> {
        state::save(self.config, &self.info)?;
        self.cgroup.set(resources)?;
        self.cgroup.apply(self.info.pid)?;
        if let Some((manager, network)) = &self.network {
            let endpoint = manager.connect(network, &self.info)?;
            self.connected = true;
            tracing::info!(container = %self.info.name, ip = %endpoint.ip_address, "network attached");
        }
        Ok(())
    }

    /// Releases network, cgroup, filesystem, and record; every step is
    /// attempted.
    fn teardown(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let (true, Some((manager, network))) = (self.connected, &self.network) {
            if let Err(e) = manager.disconnect(network, &self.info) {
                errors.push(e);
            }
        }
        if let Err(e) = self.cgroup.destroy() {
            errors.push(e);
        }
        if let Err(e) = self.workspace.teardown() {
            errors.push(e);
        }
        if let Err(e) = state::remove(self.config, &self.info.name) {
            errors.push(e);
        }
        VesselError::collect(errors)
    }

    fn teardown_logged(&self) {
        match self.teardown() {
            Ok(()) => tracing::info!(container = %self.info.name, "container torn down"),
            Err(e) => tracing::error!(container = %self.info.name, error = %e, "teardown incomplete"),
        }
    }
}

/// Starts a container.
///
/// Detached containers are left running with their log at
/// `<run_dir>/<name>/container.log`. Interactive ones are waited for and
/// torn down once they exit.
///
/// # Errors
///
/// Returns an error if the options are invalid, the name is taken, the
/// network or image is unknown, or any start step fails. Nothing the start
/// created is left behind on failure.
pub fn run(config: &VesselConfig, opts: &RunOptions) -> Result<RunOutcome> {
    opts.validate()?;
    let id = ContainerId::generate();
    let name = opts.name.clone().unwrap_or_else(|| id.to_string());
    if state::exists(config, &name) {
        return Err(VesselError::Config {
            message: format!("container name {name} is already in use"),
        });
    }

    let network = match &opts.network {
        Some(network) => {
            let manager = NetworkManager::init(config)?;
            let _ = manager.network(network)?;
            Some((manager, network.clone()))
        }
        None => None,
    };

    let workspace = Workspace::new(config, &opts.image, &name, opts.volume.as_deref())?;
    workspace.prepare()?;

    let bootstrap = BootstrapConfig {
        interactive: opts.tty,
        rootfs: workspace.rootfs().to_path_buf(),
        log_file: (!opts.tty).then(|| config.container_log(&name)),
        env: opts.env.clone(),
        namespaces: NamespaceConfig::default(),
    };
    let mut parent = match process::spawn(&bootstrap) {
        Ok(parent) => parent,
        Err(e) => {
            let cleanup = [workspace.teardown(), state::remove(config, &name)]
                .into_iter()
                .filter_map(|step| step.err())
                .collect();
            if let Err(cleanup) = VesselError::collect(cleanup) {
                tracing::warn!(container = %name, error = %cleanup, "rollback after failed clone incomplete");
            }
            return Err(e);
        }
    };

    let mut info = ContainerInfo::new(parent.pid(), id.clone(), &name, &opts.command);
    info.volume = opts.volume.clone().unwrap_or_default();
    info.port_mapping = opts.port_mapping.clone();
    let mut container = Container {
        config,
        info,
        workspace,
        cgroup: CgroupManager::new(id.as_str()),
        network,
        connected: false,
    };

    let payload = InitPayload {
        command: opts.command.clone(),
        hostname: Some(name.clone()),
    };
    if let Err(e) = container
        .wire(&opts.resources)
        .and_then(|()| parent.signal(&payload))
    {
        tracing::error!(container = %name, error = %e, "start failed, rolling back");
        if let Err(kill) = parent.kill() {
            tracing::warn!(container = %name, error = %kill, "could not kill init process");
        }
        container.teardown_logged();
        return Err(e);
    }
    tracing::info!(container = %name, id = %id, pid = parent.pid(), "container started");

    if !opts.tty {
        return Ok(RunOutcome::Detached(container.info));
    }

    let code = parent.wait();
    container.info.status = ContainerStatus::Exited;
    container.teardown_logged();
    let code = code?;
    tracing::info!(container = %name, code, "container exited");
    Ok(RunOutcome::Exited {
        info: container.info,
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            image: "busybox".into(),
            command: vec!["top".into()],
            ..RunOptions::default()
        }
    }

    fn config(dir: &tempfile::TempDir) -> VesselConfig {
        VesselConfig::new(dir.path().join("run"), dir.path().join("data"))
    }

    #[test]
    fn empty_command_is_rejected() {
        let opts = RunOptions {
            command: Vec::new(),
            ..options()
        };
        assert!(matches!(opts.validate(), Err(VesselError::Config { .. })));
    }

    #[test]
    fn names_with_separators_are_rejected() {
        for bad in ["", "..", "a/b"] {
            let opts = RunOptions {
                name: Some(bad.into()),
                ..options()
            };
            assert!(opts.validate().is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn environment_entries_need_an_equals_sign() {
        let opts = RunOptions {
            env: vec!["A=1".into(), "B".into()],
            ..options()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn taken_name_is_rejected_before_anything_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let existing = ContainerInfo::new(1, ContainerId::new("abc"), "web", &["sh".into()]);
        state::save(&cfg, &existing).unwrap();

        let opts = RunOptions {
            name: Some("web".into()),
            ..options()
        };
        assert!(matches!(run(&cfg, &opts), Err(VesselError::Config { .. })));
        assert!(!cfg.mount_dir("web").exists());
    }

    #[test]
    fn unknown_network_fails_before_the_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        std::fs::create_dir_all(cfg.image_dir("busybox")).unwrap();
        let opts = RunOptions {
            name: Some("web".into()),
            network: Some("nowhere".into()),
            ..options()
        };

        assert!(run(&cfg, &opts).unwrap_err().is_not_found());
        assert!(!cfg.mount_dir("web").exists());
        assert!(!state::exists(&cfg, "web"));
    }

    #[test]
    fn missing_image_leaves_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let opts = RunOptions {
            name: Some("web".into()),
            ..options()
        };

        assert!(run(&cfg, &opts).unwrap_err().is_not_found());
        assert!(!state::exists(&cfg, "web"));
    }

    #[test]
    fn outcome_exposes_the_record() {
        let info = ContainerInfo::new(5, ContainerId::new("abc"), "web", &["sh".into()]);
        let outcome = RunOutcome::Exited {
            info: info.clone(),
            code: 0,
        };
        assert_eq!(outcome.info(), &info);
    }
}
