//! System-wide constants and default paths.

/// Default directory for runtime state (container records, network registry).
pub const DEFAULT_RUN_DIR: &str = "/var/run/vessel";

/// Default directory for images, writable layers, and mount points.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/vessel";

/// Environment variable overriding [`DEFAULT_RUN_DIR`].
pub const RUN_DIR_ENV: &str = "VESSEL_RUN_DIR";

/// Environment variable overriding [`DEFAULT_DATA_DIR`].
pub const DATA_DIR_ENV: &str = "VESSEL_DATA_DIR";

/// Process mount table consulted for cgroup hierarchy discovery.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Sentinel first argument that selects the in-namespace init path.
pub const INIT_ARG: &str = "init";

/// File descriptor on which the init process receives its payload.
pub const INIT_PIPE_FD: i32 = 3;

/// File name of the persisted container record.
pub const CONFIG_NAME: &str = "config.json";

/// File name of a detached container's captured output.
pub const CONTAINER_LOG_FILE: &str = "container.log";

/// Name of the built-in bridge network driver.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Maximum length of a network interface name (`IFNAMSIZ - 1`).
pub const MAX_IFNAME_LEN: usize = 15;
