//! Cross-module tests for the container lifecycle that need no privileges.
//!
//! Starting a real container needs root, cgroup v1, and the `vessel` binary
//! as `/proc/self/exe`, so these tests cover the paths that fail early and
//! the state that `exec` relies on.

#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use vessel_common::config::VesselConfig;
use vessel_common::error::VesselError;
use vessel_common::types::{ContainerId, ContainerInfo, ResourceConfig};
use vessel_runtime::container::{self, RunOptions};
use vessel_runtime::{exec, state};

fn config(dir: &tempfile::TempDir) -> VesselConfig {
    VesselConfig::new(dir.path().join("run"), dir.path().join("data"))
}

fn options(name: &str) -> RunOptions {
    RunOptions {
        image: "busybox".into(),
        command: vec!["top".into()],
        name: Some(name.into()),
        resources: ResourceConfig {
            memory_limit: "100m".into(),
            ..ResourceConfig::default()
        },
        ..RunOptions::default()
    }
}

// ── Records ──────────────────────────────────────────────────────────

#[test]
fn exec_refuses_a_container_whose_process_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let info = ContainerInfo::new(i32::MAX, ContainerId::new("0123456789ab"), "stale", &["top".into()]);
    state::save(&cfg, &info).unwrap();

    let err = exec::exec_in_container(&cfg, "stale", &["sh".into()]).unwrap_err();
    assert!(matches!(err, VesselError::Config { .. }), "got {err}");
}

#[test]
fn exec_of_unknown_container_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = exec::exec_in_container(&config(&dir), "ghost", &["sh".into()]).unwrap_err();
    assert!(err.is_not_found());
}

// ── Failed starts ────────────────────────────────────────────────────

#[test]
fn run_with_port_mapping_on_unknown_network_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    std::fs::create_dir_all(cfg.image_dir("busybox")).unwrap();
    let opts = RunOptions {
        network: Some("testbridge".into()),
        port_mapping: vec!["8080:80".into()],
        ..options("web")
    };

    assert!(container::run(&cfg, &opts).unwrap_err().is_not_found());
    assert!(!state::exists(&cfg, "web"));
    assert!(!cfg.mount_dir("web").exists());
    assert!(!cfg.layer_dir("web").exists());
}

#[test]
fn malformed_volume_is_rejected_before_mounting() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    std::fs::create_dir_all(cfg.image_dir("busybox")).unwrap();
    let opts = RunOptions {
        volume: Some("relative-only".into()),
        ..options("vol")
    };

    let err = container::run(&cfg, &opts).unwrap_err();
    assert!(matches!(err, VesselError::Malformed { .. }), "got {err}");
    assert!(!cfg.mount_dir("vol").exists());
}

#[test]
fn second_start_with_the_same_name_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let running = ContainerInfo::new(1, ContainerId::new("aaaaaaaaaaaa"), "dup", &["top".into()]);
    state::save(&cfg, &running).unwrap();

    assert!(matches!(
        container::run(&cfg, &options("dup")),
        Err(VesselError::Config { .. })
    ));
    assert_eq!(state::load(&cfg, "dup").unwrap(), running);
}

#[test]
fn failed_root_filesystem_mount_leaves_no_directories() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    std::fs::create_dir_all(cfg.image_dir("bad:image")).unwrap();
    let opts = RunOptions {
        image: "bad:image".into(),
        ..options("broken")
    };

    assert!(container::run(&cfg, &opts).is_err());
    assert!(!cfg.layer_dir("broken").exists());
    assert!(!cfg.mount_dir("broken").exists());
    assert!(!state::exists(&cfg, "broken"));
}
