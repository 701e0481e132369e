//! CPU pinning via the v1 `cpuset` hierarchy.
//!
//! The kernel refuses to attach tasks to a cpuset whose `cpuset.cpus` or
//! `cpuset.mems` is empty, so a fresh cgroup inherits whichever of the two
//! it is not given from its parent.

use std::fs;
use std::path::Path;

use vessel_common::error::Result;
use vessel_common::types::ResourceConfig;

use super::{CgroupPathResolver, Subsystem, write_control};

/// Control file holding the allowed CPU list.
pub const CPUS_FILE: &str = "cpuset.cpus";

/// Control file holding the allowed memory nodes.
pub const MEMS_FILE: &str = "cpuset.mems";

/// The `cpuset` controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpusetSubsystem;

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn set(&self, resolver: &CgroupPathResolver, cgroup_path: &str, res: &ResourceConfig) -> Result<()> {
        let dir = resolver.resolve(self.name(), cgroup_path, true)?;
        if res.cpu_set.is_empty() {
            inherit(&dir, CPUS_FILE)?;
        } else {
            write_control(&dir, CPUS_FILE, &res.cpu_set)?;
            tracing::debug!(cpus = %res.cpu_set, "cpuset set");
        }
        inherit(&dir, MEMS_FILE)
    }
}

/// Copies `file` from the parent cgroup unless `dir` already has a value.
fn inherit(dir: &Path, file: &str) -> Result<()> {
    let current = fs::read_to_string(dir.join(file)).unwrap_or_default();
    if !current.trim().is_empty() {
        return Ok(());
    }
    let inherited = dir
        .parent()
        .and_then(|parent| fs::read_to_string(parent.join(file)).ok())
        .unwrap_or_default();
    if inherited.trim().is_empty() {
        return Ok(());
    }
    write_control(dir, file, inherited.trim())
}
