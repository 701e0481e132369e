//! Linux bridge driver.
//!
//! Each network is a kernel bridge carrying the gateway address, with a
//! MASQUERADE rule so containers can reach beyond the host. Endpoints are
//! veth pairs whose host end is enslaved to the bridge.

use std::path::PathBuf;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use vessel_common::constants::{BRIDGE_DRIVER, MAX_IFNAME_LEN};
use vessel_common::error::{Result, VesselError};

use super::NetworkDriver;
use crate::command::{CommandRunner, SystemRunner, ip, iptables};
use crate::ipam;
use crate::network::{Endpoint, Network, VethPair};

/// Where the kernel publishes per-interface attributes.
const SYSFS_NET: &str = "/sys/class/net";

const HOST_PREFIX: &str = "veth";
const PEER_PREFIX: &str = "ceth";

/// Bridge-backed [`NetworkDriver`].
pub struct BridgeDriver {
    runner: Arc<dyn CommandRunner>,
    sysfs: PathBuf,
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver")
            .field("sysfs", &self.sysfs)
            .finish_non_exhaustive()
    }
}

impl Default for BridgeDriver {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner))
    }
}

impl BridgeDriver {
    /// Creates a driver issuing its commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            sysfs: PathBuf::from(SYSFS_NET),
        }
    }

    /// Reads interface attributes from `sysfs` instead of `/sys/class/net`.
    #[must_use]
    pub fn with_sysfs(mut self, sysfs: impl Into<PathBuf>) -> Self {
        self.sysfs = sysfs.into();
        self
    }

    fn link_exists(&self, name: &str) -> bool {
        self.sysfs.join(name).exists()
    }

    fn mac_of(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.sysfs.join(name).join("address"))
            .ok()
            .map(|mac| mac.trim().to_owned())
            .filter(|mac| !mac.is_empty())
    }

    fn setup_bridge(&self, gateway: Ipv4Network, name: &str) -> Result<()> {
        let runner = &*self.runner;
        ip(runner, &["addr", "add", &gateway.to_string(), "dev", name])?;
        ip(runner, &["link", "set", name, "up"])?;
        iptables(runner, &masquerade_args("-A", &ipam::canonical(&gateway), name))?;
        Ok(())
    }

    fn attach(&self, bridge: &str, device: &VethPair) -> Result<()> {
        let runner = &*self.runner;
        ip(runner, &["link", "set", &device.name, "master", bridge])?;
        ip(runner, &["link", "set", &device.name, "up"])?;
        Ok(())
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &str {
        BRIDGE_DRIVER
    }

    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network> {
        if name.is_empty() || name.len() > MAX_IFNAME_LEN {
            return Err(VesselError::Config {
                message: format!(
                    "bridge name {name:?} must be 1 to {MAX_IFNAME_LEN} bytes long"
                ),
            });
        }

        ip(&*self.runner, &["link", "add", name, "type", "bridge"])?;
        if let Err(e) = self.setup_bridge(gateway, name) {
            if let Err(cleanup) = ip(&*self.runner, &["link", "delete", name, "type", "bridge"]) {
                tracing::warn!(bridge = name, error = %cleanup, "rollback of bridge failed");
            }
            return Err(e);
        }

        tracing::info!(bridge = name, gateway = %gateway, "bridge network created");
        Ok(Network {
            name: name.to_owned(),
            ip_range: gateway,
            driver: BRIDGE_DRIVER.to_owned(),
        })
    }

    fn delete(&self, network: &Network) -> Result<()> {
        let runner = &*self.runner;
        let mut errors = Vec::new();

        if let Err(e) = iptables(runner, &masquerade_args("-D", &network.cidr(), &network.name)) {
            tracing::warn!(bridge = %network.name, error = %e, "masquerade rule not removed");
            errors.push(e);
        }
        if self.link_exists(&network.name) {
            if let Err(e) = ip(runner, &["link", "delete", &network.name, "type", "bridge"]) {
                errors.push(e);
            }
        } else {
            tracing::debug!(bridge = %network.name, "bridge already gone");
        }

        VesselError::collect(errors)?;
        tracing::info!(bridge = %network.name, "bridge network deleted");
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()> {
        let device = veth_names(endpoint.container_id());
        ip(
            &*self.runner,
            &[
                "link",
                "add",
                &device.name,
                "type",
                "veth",
                "peer",
                "name",
                &device.peer_name,
            ],
        )?;

        if let Err(e) = self.attach(&network.name, &device) {
            if let Err(cleanup) = ip(&*self.runner, &["link", "delete", &device.name]) {
                tracing::warn!(veth = %device.name, error = %cleanup, "rollback of veth failed");
            }
            return Err(e);
        }

        endpoint.mac_address = self.mac_of(&device.peer_name);
        tracing::info!(
            endpoint = %endpoint.id,
            veth = %device.name,
            peer = %device.peer_name,
            bridge = %network.name,
            "veth pair attached"
        );
        endpoint.device = device;
        Ok(())
    }

    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        let name = &endpoint.device.name;
        if name.is_empty() || !self.link_exists(name) {
            tracing::debug!(endpoint = %endpoint.id, "veth already gone");
            return Ok(());
        }
        ip(&*self.runner, &["link", "delete", name.as_str()])?;
        tracing::info!(endpoint = %endpoint.id, bridge = %network.name, "veth pair removed");
        Ok(())
    }
}

/// Veth names derived from the container id, within the kernel's limit.
#[must_use]
pub fn veth_names(container_id: &str) -> VethPair {
    let budget = MAX_IFNAME_LEN - HOST_PREFIX.len();
    let suffix: String = container_id.chars().take(budget).collect();
    VethPair {
        name: format!("{HOST_PREFIX}{suffix}"),
        peer_name: format!("{PEER_PREFIX}{suffix}"),
    }
}

fn masquerade_args(action: &str, cidr: &str, bridge: &str) -> Vec<String> {
    [
        "-t",
        "nat",
        action,
        "POSTROUTING",
        "-s",
        cidr,
        "!",
        "-o",
        bridge,
        "-j",
        "MASQUERADE",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use vessel_common::types::{ContainerId, ContainerInfo};

    use super::*;
    use crate::command::testutil::RecordingRunner;

    fn driver(runner: &Arc<RecordingRunner>, sysfs: &std::path::Path) -> BridgeDriver {
        BridgeDriver::new(Arc::clone(runner) as Arc<dyn CommandRunner>).with_sysfs(sysfs)
    }

    fn endpoint(network: &Network) -> Endpoint {
        let info = ContainerInfo::new(7, ContainerId::new("0123456789ab"), "web", &["sh".into()]);
        Endpoint::new(network, &info, Ipv4Addr::new(192, 168, 100, 2))
    }

    #[test]
    fn veth_names_fit_the_interface_limit() {
        let pair = veth_names("0123456789abcdef");
        assert_eq!(pair.name, "veth0123456789a");
        assert_eq!(pair.peer_name, "ceth0123456789a");
        assert!(pair.name.len() <= MAX_IFNAME_LEN);
    }

    #[test]
    fn create_configures_bridge_and_masquerade() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let net = driver(&runner, dir.path())
            .create("192.168.100.1/24".parse().unwrap(), "br0")
            .unwrap();

        assert_eq!(net.gateway(), Ipv4Addr::new(192, 168, 100, 1));
        assert_eq!(net.driver, "bridge");
        assert_eq!(
            runner.calls(),
            vec![
                "ip link add br0 type bridge",
                "ip addr add 192.168.100.1/24 dev br0",
                "ip link set br0 up",
                "iptables -t nat -A POSTROUTING -s 192.168.100.0/24 ! -o br0 -j MASQUERADE",
            ]
        );
    }

    #[test]
    fn failed_setup_removes_the_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::failing_on("addr add"));
        let err = driver(&runner, dir.path())
            .create("10.0.0.1/24".parse().unwrap(), "br1")
            .unwrap_err();

        assert!(matches!(err, VesselError::Command { .. }));
        assert_eq!(
            runner.calls().last().map(String::as_str),
            Some("ip link delete br1 type bridge")
        );
    }

    #[test]
    fn overlong_bridge_name_is_rejected_without_commands() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let err = driver(&runner, dir.path())
            .create("10.0.0.1/24".parse().unwrap(), "a-very-long-bridge")
            .unwrap_err();
        assert!(matches!(err, VesselError::Config { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn connect_plugs_veth_into_bridge_and_reads_peer_mac() {
        let dir = tempfile::tempdir().unwrap();
        let peer = dir.path().join("ceth0123456789a");
        std::fs::create_dir_all(&peer).unwrap();
        std::fs::write(peer.join("address"), "02:42:ac:11:00:02\n").unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let drv = driver(&runner, dir.path());
        let net = drv.create("192.168.100.1/24".parse().unwrap(), "br0").unwrap();
        let mut ep = endpoint(&net);
        drv.connect(&net, &mut ep).unwrap();

        assert_eq!(ep.device.name, "veth0123456789a");
        assert_eq!(ep.mac_address.as_deref(), Some("02:42:ac:11:00:02"));
        let calls = runner.calls();
        assert!(calls.contains(&"ip link add veth0123456789a type veth peer name ceth0123456789a".to_owned()));
        assert!(calls.contains(&"ip link set veth0123456789a master br0".to_owned()));
    }

    #[test]
    fn disconnect_skips_a_vanished_link() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let drv = driver(&runner, dir.path());
        let net = Network {
            name: "br0".into(),
            ip_range: "192.168.100.1/24".parse().unwrap(),
            driver: "bridge".into(),
        };
        let mut ep = endpoint(&net);
        ep.device = veth_names("0123456789ab");

        drv.disconnect(&net, &ep).unwrap();
        assert!(runner.calls().is_empty());

        std::fs::create_dir_all(dir.path().join(&ep.device.name)).unwrap();
        drv.disconnect(&net, &ep).unwrap();
        assert_eq!(runner.calls(), vec!["ip link delete veth0123456789a"]);
    }

    #[test]
    fn delete_continues_after_masquerade_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("br0")).unwrap();
        let runner = Arc::new(RecordingRunner::failing_on("MASQUERADE"));
        let net = Network {
            name: "br0".into(),
            ip_range: "192.168.100.1/24".parse().unwrap(),
            driver: "bridge".into(),
        };

        assert!(driver(&runner, dir.path()).delete(&net).is_err());
        assert_eq!(
            runner.calls().last().map(String::as_str),
            Some("ip link delete br0 type bridge")
        );
    }
}
