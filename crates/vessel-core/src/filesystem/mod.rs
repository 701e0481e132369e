//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` layer mounts for the container root, bind mounts for
//! volumes, the pseudo-filesystems init needs, and `pivot_root` for
//! switching into the prepared root.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
