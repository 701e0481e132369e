//! Container lifecycle management for the vessel runtime.
//!
//! Ties the isolation primitives of `vessel-core` and the bridge networking
//! of `vessel-net` into the `run` and `exec` operations.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod exec;
pub mod state;
pub mod workspace;
