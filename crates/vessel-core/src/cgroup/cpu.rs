//! CPU share control via the v1 `cpu` hierarchy.

use vessel_common::error::Result;
use vessel_common::types::ResourceConfig;

use super::{CgroupPathResolver, Subsystem, write_control};

/// Control file holding the relative CPU weight.
pub const SHARES_FILE: &str = "cpu.shares";

/// The `cpu` controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuSubsystem;

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn set(&self, resolver: &CgroupPathResolver, cgroup_path: &str, res: &ResourceConfig) -> Result<()> {
        let dir = resolver.resolve(self.name(), cgroup_path, true)?;
        if !res.cpu_share.is_empty() {
            write_control(&dir, SHARES_FILE, &res.cpu_share)?;
            tracing::debug!(shares = %res.cpu_share, "CPU shares set");
        }
        Ok(())
    }
}
