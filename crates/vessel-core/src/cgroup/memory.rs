//! Memory resource control via the v1 `memory` hierarchy.

use vessel_common::error::Result;
use vessel_common::types::ResourceConfig;

use super::{CgroupPathResolver, Subsystem, write_control};

/// Control file holding the hard memory limit.
pub const LIMIT_FILE: &str = "memory.limit_in_bytes";

/// The `memory` controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySubsystem;

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set(&self, resolver: &CgroupPathResolver, cgroup_path: &str, res: &ResourceConfig) -> Result<()> {
        let dir = resolver.resolve(self.name(), cgroup_path, true)?;
        if !res.memory_limit.is_empty() {
            write_control(&dir, LIMIT_FILE, &res.memory_limit)?;
            tracing::debug!(limit = %res.memory_limit, "memory limit set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cgroup::testutil;

    #[test]
    fn set_writes_limit_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = testutil::hierarchies(dir.path(), &["memory"]);
        let res = ResourceConfig {
            memory_limit: "100m".into(),
            ..ResourceConfig::default()
        };

        MemorySubsystem.set(&resolver, "c1", &res).unwrap();
        let written = fs::read(dir.path().join("memory/c1").join(LIMIT_FILE)).unwrap();
        assert_eq!(written, b"100m");
    }

    #[test]
    fn set_with_empty_limit_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = testutil::hierarchies(dir.path(), &["memory"]);

        MemorySubsystem
            .set(&resolver, "c1", &ResourceConfig::default())
            .unwrap();
        assert!(dir.path().join("memory/c1").is_dir());
        assert!(!dir.path().join("memory/c1").join(LIMIT_FILE).exists());
    }

    #[test]
    fn remove_of_missing_cgroup_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = testutil::hierarchies(dir.path(), &["memory"]);
        MemorySubsystem.remove(&resolver, "never-created").unwrap();
    }
}
