//! Network and endpoint records and their JSON persistence.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerInfo;

use crate::ipam;

/// A named group of endpoints that can reach each other directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network name; also the bridge interface name and the file name.
    pub name: String,
    /// Gateway address with the subnet prefix, e.g. `192.168.100.1/24`.
    pub ip_range: Ipv4Network,
    /// Name of the driver that owns the network.
    pub driver: String,
}

impl Network {
    /// Address of the gateway (the bridge).
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// The subnet with host bits cleared.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix())
            .unwrap_or(self.ip_range)
    }

    /// Canonical CIDR of the subnet, e.g. `192.168.100.0/24`.
    #[must_use]
    pub fn cidr(&self) -> String {
        ipam::canonical(&self.ip_range)
    }

    /// Writes the record to `<dir>/<name>`, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        write_json(dir, &self.name, self)
    }

    /// Reads a network record.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path, "network record")
    }

    /// Deletes the record from `dir`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, dir: &Path) -> Result<()> {
        remove_file(&dir.join(&self.name))
    }
}

/// The two ends of a virtual ethernet cable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VethPair {
    /// Host end, enslaved to the bridge.
    pub name: String,
    /// Container end, moved into the container's network namespace.
    pub peer_name: String,
}

/// A container's attachment to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// `<containerId>-<network>`.
    pub id: String,
    /// Veth pair backing the endpoint, named by the driver on connect.
    pub device: VethPair,
    /// Address of the container end.
    pub ip_address: Ipv4Addr,
    /// Hardware address of the container end, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Name of the network this endpoint belongs to.
    pub network: String,
    /// `hostPort:containerPort` mappings: those requested until connected,
    /// then those actually installed.
    #[serde(default)]
    pub port_mapping: Vec<String>,
}

impl Endpoint {
    /// Builds an unconnected endpoint for `container` on `network`.
    #[must_use]
    pub fn new(network: &Network, container: &ContainerInfo, ip_address: Ipv4Addr) -> Self {
        Self {
            id: Self::id_for(&network.name, container),
            device: VethPair::default(),
            ip_address,
            mac_address: None,
            network: network.name.clone(),
            port_mapping: container.port_mapping.clone(),
        }
    }

    /// Endpoint id of `container` on the network named `network`.
    #[must_use]
    pub fn id_for(network: &str, container: &ContainerInfo) -> String {
        format!("{}-{network}", container.id)
    }

    /// Container id part of the endpoint id.
    #[must_use]
    pub fn container_id(&self) -> &str {
        self.id
            .strip_suffix(self.network.as_str())
            .and_then(|rest| rest.strip_suffix('-'))
            .unwrap_or(&self.id)
    }

    /// Path of the record for endpoint `id` under `dir`.
    #[must_use]
    pub fn path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    /// Writes the record to `<dir>/<id>.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        write_json(dir, &format!("{}.json", self.id), self)
    }

    /// Reads the record of endpoint `id`.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if there is no record, or an error
    /// if it cannot be read or parsed.
    pub fn load(dir: &Path, id: &str) -> Result<Self> {
        let path = Self::path(dir, id);
        if !path.exists() {
            return Err(VesselError::NotFound {
                kind: "endpoint",
                id: id.to_owned(),
            });
        }
        read_json(&path, "endpoint record")
    }

    /// Deletes the record. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, dir: &Path) -> Result<()> {
        remove_file(&Self::path(dir, &self.id))
    }
}

fn write_json<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| VesselError::io(dir, e))?;
    let path = dir.join(file_name);
    let raw = serde_json::to_vec_pretty(value)?;
    fs::write(&path, raw).map_err(|e| VesselError::io(&path, e))?;
    tracing::debug!(path = %path.display(), "record written");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<T> {
    let raw = fs::read(path).map_err(|e| VesselError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| VesselError::Malformed {
        what,
        message: format!("{}: {e}", path.display()),
    })
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(VesselError::io(path, e)),
        _ => Ok(()),
    }
}
