//! Global configuration model for the vessel runtime.
//!
//! All on-disk state hangs off two roots: a volatile run directory for
//! container records and the network registry, and a data directory for
//! images and container filesystems.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the vessel runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VesselConfig {
    /// Base directory for runtime state.
    pub run_dir: PathBuf,
    /// Base directory for images and container filesystems.
    pub data_dir: PathBuf,
}

impl Default for VesselConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(constants::DEFAULT_RUN_DIR),
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
        }
    }
}

impl VesselConfig {
    /// Creates a configuration rooted at the given directories.
    pub fn new(run_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Directory holding one JSON file per network.
    #[must_use]
    pub fn network_dir(&self) -> PathBuf {
        self.run_dir.join("network").join("network")
    }

    /// File holding the per-subnet allocation bitmaps.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.run_dir.join("network").join("ipam").join("subnet.json")
    }

    /// Directory holding one JSON file per connected endpoint.
    #[must_use]
    pub fn endpoint_dir(&self) -> PathBuf {
        self.run_dir.join("network").join("endpoint")
    }

    /// Per-container state directory.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }

    /// Persisted record of a container.
    #[must_use]
    pub fn container_config(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::CONFIG_NAME)
    }

    /// Captured output of a detached container.
    #[must_use]
    pub fn container_log(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::CONTAINER_LOG_FILE)
    }

    /// Read-only image root filesystem.
    #[must_use]
    pub fn image_dir(&self, image: &str) -> PathBuf {
        self.data_dir.join("images").join(image)
    }

    /// Writable layer (upper and work directories) of a container.
    #[must_use]
    pub fn layer_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join("layers").join(name)
    }

    /// Merged root filesystem mount point of a container.
    #[must_use]
    pub fn mount_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join("mnt").join(name)
    }

    /// Returns the run directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}
