//! # vessel-core
//!
//! Low-level Linux isolation primitives for the vessel runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups v1**: hierarchy discovery and the cpuset, memory, and cpu
//!   subsystem chain.
//! - **Namespaces**: clone flags for new containers and a scoped network
//!   namespace switcher for configuring them from the host.
//! - **Process bootstrap**: the two-phase parent/init handshake over an
//!   inherited pipe.
//! - **Filesystem**: `OverlayFS` mounts, bind mounts, and `pivot_root`.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation. Linux only.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod init;
pub mod namespace;
pub mod process;
