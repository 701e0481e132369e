//! # vessel-net
//!
//! Software-defined bridge networking for vessel containers.
//!
//! - **IPAM**: per-subnet allocation bitmaps persisted under the run directory
//! - **Drivers**: the [`driver::NetworkDriver`] seam and the Linux bridge driver
//! - **Endpoints**: veth pairs configured from inside the container's network
//!   namespace, plus DNAT port mappings
//! - **Manager**: the [`manager::NetworkManager`] registry tying it together

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod command;
pub mod driver;
pub mod endpoint;
pub mod ipam;
pub mod manager;
pub mod network;
pub mod portmap;
