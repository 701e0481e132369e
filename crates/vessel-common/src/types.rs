//! Domain primitive types used across the vessel workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Length of a generated identifier.
    pub const LEN: usize = 12;

    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID of [`Self::LEN`] hex characters.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(Self::LEN);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits handed to the cgroup subsystem chain.
///
/// Values are passed through verbatim in kernel units (`"100m"`, `"512"`,
/// `"0-1"`). An empty string leaves that dimension unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit written to `memory.limit_in_bytes`.
    pub memory_limit: String,
    /// Relative CPU weight written to `cpu.shares`.
    pub cpu_share: String,
    /// CPU list written to `cpuset.cpus`.
    pub cpu_set: String,
}

impl ResourceConfig {
    /// Returns `true` when no dimension is constrained.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.memory_limit.is_empty() && self.cpu_share.is_empty() && self.cpu_set.is_empty()
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container init process is alive.
    Running,
    /// Container was stopped on request.
    Stopped,
    /// Container init process has exited on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Persisted record of a started container.
///
/// The network layer reads it only to learn the init pid and the
/// requested port mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Host pid of the container's init process.
    pub pid: i32,
    /// Container identifier.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Command line executed by init.
    pub command: String,
    /// Creation timestamp (RFC 3339).
    pub created_time: String,
    /// Current lifecycle state.
    pub status: ContainerStatus,
    /// Volume specification (`host:container`), empty if none.
    pub volume: String,
    /// Port mappings in `hostPort:containerPort` form.
    pub port_mapping: Vec<String>,
}

impl ContainerInfo {
    /// Creates a running container record stamped with the current time.
    #[must_use]
    pub fn new(pid: i32, id: ContainerId, name: impl Into<String>, command: &[String]) -> Self {
        Self {
            pid,
            id,
            name: name.into(),
            command: command.join(" "),
            created_time: chrono::Local::now().to_rfc3339(),
            status: ContainerStatus::Running,
            volume: String::new(),
            port_mapping: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_fixed_length_and_differ() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_eq!(a.as_str().len(), ContainerId::LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn default_resource_config_is_unconstrained() {
        assert!(ResourceConfig::default().is_unconstrained());
        let cfg = ResourceConfig {
            memory_limit: "100m".into(),
            ..ResourceConfig::default()
        };
        assert!(!cfg.is_unconstrained());
    }

    #[test]
    fn container_info_serializes_status_in_lowercase() {
        let info = ContainerInfo::new(42, ContainerId::new("abc"), "web", &["sh".into()]);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"id\":\"abc\""));
        let back: ContainerInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
