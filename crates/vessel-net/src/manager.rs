//! Network registry and endpoint lifecycle.
//!
//! [`NetworkManager`] is the single owner of the network registry. It loads
//! the persisted networks at start-up, dispatches to drivers by name, and
//! drives IP allocation and endpoint configuration so that a failed step
//! never leaves an allocated address or a dangling link behind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ipnetwork::Ipv4Network;
use vessel_common::config::VesselConfig;
use vessel_common::error::{Result, VesselError};
use vessel_common::types::ContainerInfo;

use crate::driver::{BridgeDriver, NetworkDriver};
use crate::endpoint::{EndpointConfigurator, NetnsConfigurator};
use crate::ipam::Ipam;
use crate::network::{Endpoint, Network};

/// Registry of networks plus the drivers and allocator that back them.
pub struct NetworkManager {
    network_dir: PathBuf,
    endpoint_dir: PathBuf,
    ipam: Ipam,
    drivers: HashMap<String, Box<dyn NetworkDriver>>,
    configurator: Box<dyn EndpointConfigurator>,
    networks: Mutex<HashMap<String, Network>>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("network_dir", &self.network_dir)
            .field("endpoint_dir", &self.endpoint_dir)
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl NetworkManager {
    /// Opens the registry under `config` with the bridge driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence directories cannot be created.
    pub fn init(config: &VesselConfig) -> Result<Self> {
        Self::with_components(
            config,
            vec![Box::new(BridgeDriver::default())],
            Box::new(NetnsConfigurator::default()),
        )
    }

    /// Opens the registry with explicit drivers and endpoint configurator.
    ///
    /// Network files that cannot be parsed are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence directories cannot be created or
    /// listed.
    pub fn with_components(
        config: &VesselConfig,
        drivers: Vec<Box<dyn NetworkDriver>>,
        configurator: Box<dyn EndpointConfigurator>,
    ) -> Result<Self> {
        let network_dir = config.network_dir();
        let endpoint_dir = config.endpoint_dir();
        for dir in [&network_dir, &endpoint_dir] {
            std::fs::create_dir_all(dir).map_err(|e| VesselError::io(dir, e))?;
        }

        let networks = load_networks(&network_dir)?;
        tracing::debug!(count = networks.len(), "network registry loaded");

        Ok(Self {
            network_dir,
            endpoint_dir,
            ipam: Ipam::new(config.ipam_file()),
            drivers: drivers
                .into_iter()
                .map(|d| (d.name().to_owned(), d))
                .collect(),
            configurator,
            networks: Mutex::new(networks),
        })
    }

    /// Creates and persists a network.
    ///
    /// The first host address of `subnet` becomes the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Malformed`] for a bad CIDR,
    /// [`VesselError::NotFound`] for an unknown driver,
    /// [`VesselError::Config`] for an invalid or duplicate name, or the
    /// failure of allocation, the driver, or persistence. Nothing is left
    /// allocated or created on failure.
    pub fn create_network(&self, driver: &str, subnet: &str, name: &str) -> Result<Network> {
        validate_name(name)?;
        let subnet: Ipv4Network = subnet.parse().map_err(|e| VesselError::Malformed {
            what: "subnet",
            message: format!("{subnet}: {e}"),
        })?;
        let driver = self.driver(driver)?;

        let mut networks = self.registry();
        if networks.contains_key(name) {
            return Err(VesselError::Config {
                message: format!("network {name} already exists"),
            });
        }

        let gateway_ip = self.ipam.allocate(&subnet)?;
        let gateway = Ipv4Network::new(gateway_ip, subnet.prefix()).map_err(|e| {
            VesselError::Malformed {
                what: "subnet",
                message: e.to_string(),
            }
        })?;

        let network = match driver.create(gateway, name) {
            Ok(network) => network,
            Err(e) => {
                self.release_quietly(&subnet, gateway_ip);
                return Err(e);
            }
        };
        if let Err(e) = network.dump(&self.network_dir) {
            if let Err(cleanup) = driver.delete(&network) {
                tracing::warn!(network = name, error = %cleanup, "rollback of network failed");
            }
            self.release_quietly(&subnet, gateway_ip);
            return Err(e);
        }

        tracing::info!(network = name, subnet = %network.cidr(), gateway = %gateway_ip, "network created");
        let _ = networks.insert(name.to_owned(), network.clone());
        Ok(network)
    }

    /// Deletes a network and releases its gateway address.
    ///
    /// Every step is attempted even if an earlier one fails; the network
    /// leaves the registry in any case.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] without changing any state if the
    /// network is unknown, otherwise the collected step failures.
    pub fn delete_network(&self, name: &str) -> Result<()> {
        let mut networks = self.registry();
        let network = networks
            .get(name)
            .cloned()
            .ok_or_else(|| VesselError::NotFound {
                kind: "network",
                id: name.to_owned(),
            })?;

        let mut errors = Vec::new();
        if let Err(e) = self.ipam.release(&network.ip_range, network.gateway()) {
            errors.push(e);
        }
        match self.driver(&network.driver) {
            Ok(driver) => {
                if let Err(e) = driver.delete(&network) {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
        if let Err(e) = network.remove(&self.network_dir) {
            errors.push(e);
        }
        let _ = networks.remove(name);

        if errors.is_empty() {
            tracing::info!(network = name, "network deleted");
        } else {
            tracing::warn!(network = name, failures = errors.len(), "network deleted with errors");
        }
        VesselError::collect(errors)
    }

    /// Snapshot of every network, sorted by name.
    #[must_use]
    pub fn list_networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.registry().values().cloned().collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        networks
    }

    /// Looks up a network by name.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if the network is unknown.
    pub fn network(&self, name: &str) -> Result<Network> {
        self.registry()
            .get(name)
            .cloned()
            .ok_or_else(|| VesselError::NotFound {
                kind: "network",
                id: name.to_owned(),
            })
    }

    /// Attaches a running container to a network.
    ///
    /// Allocates an address, plugs a link into the network, configures it
    /// inside the container's namespace, maps the container's ports, and
    /// persists the endpoint so [`Self::disconnect`] can undo it. The
    /// persisted endpoint lists only the mappings that were installed.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] for an unknown network, or the
    /// failure of allocation, the driver, configuration, or persistence.
    /// Failure after allocation releases the address and removes the link.
    pub fn connect(&self, network: &str, container: &ContainerInfo) -> Result<Endpoint> {
        let network = self.network(network)?;
        let driver = self.driver(&network.driver)?;

        let ip = self.ipam.allocate(&network.ip_range)?;
        let mut endpoint = Endpoint::new(&network, container, ip);

        if let Err(e) = driver.connect(&network, &mut endpoint) {
            self.release_quietly(&network.ip_range, ip);
            return Err(e);
        }
        let mut mapped = false;
        let configured = self
            .configurator
            .configure(&network, &endpoint, container.pid)
            .and_then(|()| {
                endpoint.port_mapping = self
                    .configurator
                    .map_ports(&endpoint)
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                mapped = true;
                endpoint.dump(&self.endpoint_dir)
            });
        if let Err(e) = configured {
            if mapped {
                self.configurator.unmap_ports(&endpoint);
            }
            if let Err(cleanup) = driver.disconnect(&network, &endpoint) {
                tracing::warn!(endpoint = %endpoint.id, error = %cleanup, "rollback of link failed");
            }
            self.release_quietly(&network.ip_range, ip);
            return Err(e);
        }

        tracing::info!(
            endpoint = %endpoint.id,
            network = %network.name,
            ip = %ip,
            pid = container.pid,
            "container connected"
        );
        Ok(endpoint)
    }

    /// Detaches a container from a network.
    ///
    /// Removes port mappings and the link, releases the address, and deletes
    /// the endpoint record. Every step is attempted even if an earlier one
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if the container has no endpoint on
    /// the network, otherwise the collected step failures.
    pub fn disconnect(&self, network: &str, container: &ContainerInfo) -> Result<()> {
        let id = Endpoint::id_for(network, container);
        let endpoint = Endpoint::load(&self.endpoint_dir, &id)?;

        let mut errors = Vec::new();
        self.configurator.unmap_ports(&endpoint);
        match self.network(network) {
            Ok(net) => {
                match self.driver(&net.driver) {
                    Ok(driver) => {
                        if let Err(e) = driver.disconnect(&net, &endpoint) {
                            errors.push(e);
                        }
                    }
                    Err(e) => errors.push(e),
                }
                if let Err(e) = self.ipam.release(&net.ip_range, endpoint.ip_address) {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
        if let Err(e) = endpoint.remove(&self.endpoint_dir) {
            errors.push(e);
        }

        tracing::info!(endpoint = %id, failures = errors.len(), "container disconnected");
        VesselError::collect(errors)
    }

    fn driver(&self, name: &str) -> Result<&dyn NetworkDriver> {
        self.drivers
            .get(name)
            .map(|d| &**d)
            .ok_or_else(|| VesselError::NotFound {
                kind: "network driver",
                id: name.to_owned(),
            })
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Network>> {
        self.networks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_quietly(&self, subnet: &Ipv4Network, ip: std::net::Ipv4Addr) {
        if let Err(e) = self.ipam.release(subnet, ip) {
            tracing::warn!(%ip, error = %e, "address could not be released");
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VesselError::Config {
            message: format!("invalid network name {name:?}"),
        });
    }
    Ok(())
}

fn load_networks(dir: &std::path::Path) -> Result<HashMap<String, Network>> {
    let entries = std::fs::read_dir(dir).map_err(|e| VesselError::io(dir, e))?;
    let mut networks = HashMap::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        match Network::load(&path) {
            Ok(network) => {
                let _ = networks.insert(network.name.clone(), network);
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping network file"),
        }
    }
    Ok(networks)
}
