//! Cgroup hierarchy discovery and path resolution.
//!
//! A cgroup v1 hierarchy is a `cgroup` filesystem mounted with the
//! controller name among its super options, so the last field of the
//! matching `/proc/self/mountinfo` line names the subsystem and field five
//! is where it is mounted.

use std::fs::{self, DirBuilder};
use std::io::{BufRead, BufReader, ErrorKind};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use vessel_common::constants::MOUNTINFO_PATH;
use vessel_common::error::{Result, VesselError};

/// Resolves cgroup directories against the mounted subsystem hierarchies.
#[derive(Debug, Clone)]
pub struct CgroupPathResolver {
    mountinfo: PathBuf,
}

impl Default for CgroupPathResolver {
    fn default() -> Self {
        Self::with_mountinfo(MOUNTINFO_PATH)
    }
}

impl CgroupPathResolver {
    /// Creates a resolver reading the calling process's own mount table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver reading an alternative mount-info file.
    pub fn with_mountinfo(path: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: path.into(),
        }
    }

    /// Returns the mount point of the hierarchy carrying `subsystem`.
    ///
    /// `None` means no hierarchy is mounted for it; an unreadable mount
    /// table is treated the same way.
    #[must_use]
    pub fn find_mountpoint(&self, subsystem: &str) -> Option<PathBuf> {
        let file = match fs::File::open(&self.mountinfo) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %self.mountinfo.display(), error = %e, "cannot read mount table");
                return None;
            }
        };
        BufReader::new(file)
            .lines()
            .map_while(std::result::Result::ok)
            .find_map(|line| mountpoint_of(&line, subsystem).map(PathBuf::from))
    }

    /// Resolves `cgroup_path` inside the hierarchy of `subsystem`.
    ///
    /// With `auto_create`, a missing directory is created (mode `0755`);
    /// resolving an existing directory is a no-op either way.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if no hierarchy is mounted for the
    /// subsystem, or if the directory is absent and `auto_create` is false.
    /// Returns [`VesselError::Io`] if the directory cannot be inspected or
    /// created.
    pub fn resolve(&self, subsystem: &str, cgroup_path: &str, auto_create: bool) -> Result<PathBuf> {
        let root = self
            .find_mountpoint(subsystem)
            .ok_or_else(|| VesselError::NotFound {
                kind: "cgroup hierarchy",
                id: subsystem.to_string(),
            })?;
        let path = root.join(cgroup_path.trim_start_matches('/'));

        match fs::metadata(&path) {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == ErrorKind::NotFound && auto_create => {
                create_cgroup_dir(&path)?;
                tracing::debug!(subsystem, path = %path.display(), "cgroup created");
                Ok(path)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(VesselError::NotFound {
                kind: "cgroup",
                id: path.display().to_string(),
            }),
            Err(e) => Err(VesselError::io(path, e)),
        }
    }
}

fn create_cgroup_dir(path: &Path) -> Result<()> {
    match DirBuilder::new().mode(0o755).create(path) {
        Err(e) if e.kind() != ErrorKind::AlreadyExists => Err(VesselError::io(path, e)),
        _ => Ok(()),
    }
}

/// Extracts the mount point from one mount-info line if its option list
/// names `subsystem`.
fn mountpoint_of<'a>(line: &'a str, subsystem: &str) -> Option<&'a str> {
    let fields: Vec<&str> = line.split(' ').collect();
    let options = fields.last()?;
    if options.split(',').any(|opt| opt == subsystem) {
        fields.get(4).copied()
    } else {
        None
    }
}
