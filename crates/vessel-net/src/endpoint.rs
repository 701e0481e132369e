//! Container-side endpoint configuration.
//!
//! The container end of a veth pair is moved into the container's network
//! namespace and configured from inside it: address, link state, loopback,
//! and the default route through the bridge. Port mappings are installed on
//! the host as DNAT rules.

use std::sync::Arc;

use vessel_common::error::Result;
use vessel_core::namespace::netns::run_in_netns;

use crate::command::{CommandRunner, SystemRunner, ip, iptables};
use crate::network::{Endpoint, Network};
use crate::portmap::{self, PortMapping};

/// Configures an endpoint once its link exists on the host.
pub trait EndpointConfigurator: Send + Sync {
    /// Moves the container end into the network namespace of `pid` and
    /// configures its address and routes there.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be moved or configured. The
    /// caller's network namespace is unchanged either way.
    fn configure(&self, network: &Network, endpoint: &Endpoint, pid: i32) -> Result<()>;

    /// Installs the endpoint's port mappings and returns those in place.
    ///
    /// Malformed mappings and failing rules are logged and skipped.
    fn map_ports(&self, endpoint: &Endpoint) -> Vec<PortMapping>;

    /// Removes the endpoint's port mappings. Rules that are already gone are
    /// logged and skipped.
    fn unmap_ports(&self, endpoint: &Endpoint);
}

/// [`EndpointConfigurator`] that switches into the container's namespace.
pub struct NetnsConfigurator {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for NetnsConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetnsConfigurator").finish_non_exhaustive()
    }
}

impl Default for NetnsConfigurator {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner))
    }
}

impl NetnsConfigurator {
    /// Creates a configurator issuing its commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl EndpointConfigurator for NetnsConfigurator {
    fn configure(&self, network: &Network, endpoint: &Endpoint, pid: i32) -> Result<()> {
        let runner = &*self.runner;
        let peer = endpoint.device.peer_name.as_str();
        let address = format!("{}/{}", endpoint.ip_address, network.ip_range.prefix());
        let gateway = network.gateway().to_string();

        run_in_netns(
            pid,
            || ip(runner, &["link", "set", peer, "netns", &pid.to_string()]).map(drop),
            || {
                ip(runner, &["addr", "add", address.as_str(), "dev", peer])?;
                ip(runner, &["link", "set", peer, "up"])?;
                ip(runner, &["link", "set", "lo", "up"])?;
                ip(
                    runner,
                    &["route", "add", "default", "via", gateway.as_str(), "dev", peer],
                )?;
                Ok(())
            },
        )?;

        tracing::info!(
            endpoint = %endpoint.id,
            pid,
            address = %address,
            gateway = %gateway,
            "endpoint configured in container namespace"
        );
        Ok(())
    }

    fn map_ports(&self, endpoint: &Endpoint) -> Vec<PortMapping> {
        portmap::parse_all(&endpoint.port_mapping)
            .into_iter()
            .filter(|pm| {
                match iptables(&*self.runner, &pm.dnat_args("-A", endpoint.ip_address)) {
                    Ok(_) => {
                        tracing::info!(endpoint = %endpoint.id, mapping = %pm, "port mapped");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint.id, mapping = %pm, error = %e, "port mapping failed");
                        false
                    }
                }
            })
            .collect()
    }

    fn unmap_ports(&self, endpoint: &Endpoint) {
        for pm in portmap::parse_all(&endpoint.port_mapping) {
            if let Err(e) = iptables(&*self.runner, &pm.dnat_args("-D", endpoint.ip_address)) {
                tracing::warn!(endpoint = %endpoint.id, mapping = %pm, error = %e, "port unmapping failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use vessel_common::types::{ContainerId, ContainerInfo};

    use super::*;
    use crate::command::testutil::RecordingRunner;

    fn fixture(ports: &[&str]) -> (Network, Endpoint) {
        let network = Network {
            name: "br0".into(),
            ip_range: "192.168.100.1/24".parse().unwrap(),
            driver: "bridge".into(),
        };
        let mut info = ContainerInfo::new(9, ContainerId::new("0123456789ab"), "web", &["sh".into()]);
        info.port_mapping = ports.iter().map(|p| (*p).to_owned()).collect();
        let endpoint = Endpoint::new(&network, &info, Ipv4Addr::new(192, 168, 100, 2));
        (network, endpoint)
    }

    #[test]
    fn map_ports_skips_malformed_and_failing_rules() {
        let runner = Arc::new(RecordingRunner::failing_on("--dport 9090"));
        let cfg = NetnsConfigurator::new(Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let (_, ep) = fixture(&["8080:80", "nonsense", "9090:90"]);

        let mapped = cfg.map_ports(&ep);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].host_port, 8080);
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn unmap_ports_deletes_each_rule() {
        let runner = Arc::new(RecordingRunner::default());
        let cfg = NetnsConfigurator::new(Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let (_, ep) = fixture(&["8080:80"]);

        cfg.unmap_ports(&ep);
        assert_eq!(
            runner.calls(),
            vec![
                "iptables -t nat -D PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.100.2:80"
            ]
        );
    }

    #[test]
    fn configure_for_missing_process_runs_nothing() {
        let runner = Arc::new(RecordingRunner::default());
        let cfg = NetnsConfigurator::new(Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let (net, ep) = fixture(&[]);

        let err = cfg.configure(&net, &ep, i32::MAX).unwrap_err();
        assert!(err.is_not_found());
        assert!(runner.calls().is_empty());
    }
}
