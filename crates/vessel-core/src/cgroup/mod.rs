//! Cgroups v1 resource management.
//!
//! Each resource controller is a [`Subsystem`] with its own hierarchy. A
//! container's cgroup is the same relative path (its id) inside every
//! hierarchy, and [`CgroupManager`] drives the chain in a fixed order.

pub mod cpu;
pub mod cpuset;
pub mod memory;
pub mod resolver;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use vessel_common::error::{Result, VesselError};
use vessel_common::types::ResourceConfig;

pub use self::cpu::CpuSubsystem;
pub use self::cpuset::CpusetSubsystem;
pub use self::memory::MemorySubsystem;
pub use self::resolver::CgroupPathResolver;

/// Control file listing the tasks attached to a cgroup.
pub const TASKS_FILE: &str = "tasks";

/// One resource controller in the chain.
///
/// Variants hold no state; everything they touch is derived from the
/// resolver and the cgroup path handed in on each call.
pub trait Subsystem: Send + Sync {
    /// Controller name, matched against hierarchy mount options.
    fn name(&self) -> &'static str;

    /// Creates the cgroup if needed and writes this controller's limit.
    ///
    /// Writes nothing when the limit is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup cannot be resolved or the control
    /// file cannot be written.
    fn set(&self, resolver: &CgroupPathResolver, cgroup_path: &str, res: &ResourceConfig)
    -> Result<()>;

    /// Attaches `pid` to an existing cgroup.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if the cgroup does not exist, or an
    /// I/O error if the task list cannot be written.
    fn apply(&self, resolver: &CgroupPathResolver, cgroup_path: &str, pid: i32) -> Result<()> {
        let dir = resolver.resolve(self.name(), cgroup_path, false)?;
        append_task(&dir, pid)?;
        tracing::debug!(subsystem = self.name(), pid, "process attached to cgroup");
        Ok(())
    }

    /// Deletes the cgroup. A cgroup that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    fn remove(&self, resolver: &CgroupPathResolver, cgroup_path: &str) -> Result<()> {
        match resolver.resolve(self.name(), cgroup_path, false) {
            Ok(dir) => remove_cgroup_dir(&dir),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Returns the subsystem chain in application order.
#[must_use]
pub fn default_subsystems() -> Vec<Box<dyn Subsystem>> {
    vec![
        Box::new(CpusetSubsystem),
        Box::new(MemorySubsystem),
        Box::new(CpuSubsystem),
    ]
}

/// Handle to one container's cgroup across every subsystem hierarchy.
pub struct CgroupManager {
    path: String,
    resolver: CgroupPathResolver,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl std::fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupManager")
            .field("path", &self.path)
            .field(
                "subsystems",
                &self.subsystems.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl CgroupManager {
    /// Creates a manager for the cgroup at `path` in every hierarchy.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_resolver(path, CgroupPathResolver::default())
    }

    /// Creates a manager using a specific resolver.
    pub fn with_resolver(path: impl Into<String>, resolver: CgroupPathResolver) -> Self {
        Self {
            path: path.into(),
            resolver,
            subsystems: default_subsystems(),
        }
    }

    /// Returns the relative cgroup path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Creates the cgroup in every hierarchy and writes the limits `res`
    /// sets; empty limits write nothing.
    ///
    /// Stops at the first failure. Limits already written stay in place;
    /// call [`Self::destroy`] to clean up.
    ///
    /// # Errors
    ///
    /// Returns the first subsystem error.
    pub fn set(&self, res: &ResourceConfig) -> Result<()> {
        for subsystem in &self.subsystems {
            subsystem.set(&self.resolver, &self.path, res)?;
        }
        tracing::info!(cgroup = %self.path, limits = ?res, "cgroup limits set");
        Ok(())
    }

    /// Attaches `pid` to the cgroup in every hierarchy created by
    /// [`Self::set`].
    ///
    /// # Errors
    ///
    /// Returns the first subsystem error.
    pub fn apply(&self, pid: i32) -> Result<()> {
        for subsystem in &self.subsystems {
            subsystem.apply(&self.resolver, &self.path, pid)?;
        }
        tracing::info!(cgroup = %self.path, pid, "process attached to cgroups");
        Ok(())
    }

    /// Removes the cgroup from every hierarchy.
    ///
    /// Every subsystem is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the collected failures.
    pub fn destroy(&self) -> Result<()> {
        let mut errors = Vec::new();
        for subsystem in &self.subsystems {
            if let Err(e) = subsystem.remove(&self.resolver, &self.path) {
                tracing::warn!(subsystem = subsystem.name(), error = %e, "cgroup removal failed");
                errors.push(e);
            }
        }
        tracing::info!(cgroup = %self.path, "cgroup destroyed");
        VesselError::collect(errors)
    }
}

/// Writes `value` to a control file of the cgroup at `dir`.
pub(crate) fn write_control(dir: &Path, file: &str, value: &str) -> Result<()> {
    let path = dir.join(file);
    fs::write(&path, value).map_err(|e| VesselError::io(path, e))
}

fn append_task(dir: &Path, pid: i32) -> Result<()> {
    let path = dir.join(TASKS_FILE);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| VesselError::io(path.clone(), e))?;
    writeln!(file, "{pid}").map_err(|e| VesselError::io(path, e))
}

/// Removes a cgroup directory.
///
/// On cgroupfs a plain `rmdir` succeeds even though control files are
/// listed, so the recursive fallback only matters for ordinary directories.
fn remove_cgroup_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir(dir) {
        Ok(()) => {
            tracing::debug!(path = %dir.display(), "cgroup removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
            fs::remove_dir_all(dir).map_err(|e| VesselError::io(dir, e))
        }
        Err(e) => Err(VesselError::io(dir, e)),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs;
    use std::path::Path;

    use super::CgroupPathResolver;

    /// Mounts fake hierarchies for `subsystems` under `dir`.
    pub fn hierarchies(dir: &Path, subsystems: &[&str]) -> CgroupPathResolver {
        let mut table = String::new();
        for (i, name) in subsystems.iter().enumerate() {
            let root = dir.join(name);
            fs::create_dir_all(&root).unwrap();
            table.push_str(&format!(
                "{} 25 0:{} / {} rw,relatime - cgroup cgroup rw,{name}\n",
                40 + i,
                40 + i,
                root.display()
            ));
        }
        let path = dir.join("mountinfo");
        fs::write(&path, table).unwrap();
        CgroupPathResolver::with_mountinfo(path)
    }
}
