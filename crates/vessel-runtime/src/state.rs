//! Persistent container records.
//!
//! Each container keeps its [`ContainerInfo`] at
//! `<run_dir>/<name>/config.json`, enabling daemon-less `exec` and
//! teardown.

use std::fs;

use vessel_common::config::VesselConfig;
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerInfo;

/// Writes the record of `info`, creating its directory.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save(config: &VesselConfig, info: &ContainerInfo) -> Result<()> {
    let dir = config.container_dir(&info.name);
    fs::create_dir_all(&dir).map_err(|e| VesselError::io(&dir, e))?;

    let path = config.container_config(&info.name);
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_vec_pretty(info)?;
    fs::write(&tmp, raw).map_err(|e| VesselError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| VesselError::io(&path, e))?;
    tracing::debug!(path = %path.display(), "container record saved");
    Ok(())
}

/// Reads the record of the container called `name`.
///
/// # Errors
///
/// Returns [`VesselError::NotFound`] if there is no record, or an error if
/// it cannot be read or parsed.
pub fn load(config: &VesselConfig, name: &str) -> Result<ContainerInfo> {
    let path = config.container_config(name);
    let raw = fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => VesselError::NotFound {
            kind: "container",
            id: name.to_owned(),
        },
        _ => VesselError::io(&path, e),
    })?;
    serde_json::from_slice(&raw).map_err(|e| VesselError::Malformed {
        what: "container record",
        message: format!("{}: {e}", path.display()),
    })
}

/// Returns `true` if a record exists for `name`.
#[must_use]
pub fn exists(config: &VesselConfig, name: &str) -> bool {
    config.container_config(name).exists()
}

/// Removes the container's state directory, including its log. A missing
/// directory is not an error.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be removed.
pub fn remove(config: &VesselConfig, name: &str) -> Result<()> {
    let dir = config.container_dir(name);
    match fs::remove_dir_all(&dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(VesselError::io(&dir, e)),
        _ => {
            tracing::debug!(dir = %dir.display(), "container record removed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use vessel_common::types::ContainerId;

    use super::*;

    fn config(dir: &tempfile::TempDir) -> VesselConfig {
        VesselConfig::new(dir.path().join("run"), dir.path().join("data"))
    }

    #[test]
    fn save_then_load_returns_the_same_record() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let mut info = ContainerInfo::new(77, ContainerId::new("0123456789ab"), "web", &["top".into()]);
        info.port_mapping = vec!["8080:80".into()];

        save(&cfg, &info).unwrap();
        assert!(exists(&cfg, "web"));
        assert_eq!(load(&cfg, "web").unwrap(), info);
    }

    #[test]
    fn load_of_unknown_container_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&config(&dir), "ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn remove_deletes_directory_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let info = ContainerInfo::new(1, ContainerId::new("abc"), "db", &["sh".into()]);
        save(&cfg, &info).unwrap();
        std::fs::write(cfg.container_log("db"), "output").unwrap();

        remove(&cfg, "db").unwrap();
        assert!(!cfg.container_dir("db").exists());
        remove(&cfg, "db").unwrap();
    }

    #[test]
    fn corrupt_record_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        std::fs::create_dir_all(cfg.container_dir("bad")).unwrap();
        std::fs::write(cfg.container_config("bad"), "[").unwrap();
        assert!(matches!(load(&cfg, "bad"), Err(VesselError::Malformed { .. })));
    }
}
