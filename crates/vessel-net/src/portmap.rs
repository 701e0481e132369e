//! `hostPort:containerPort` forwarding rules.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use vessel_common::error::VesselError;

/// A TCP port forwarded from the host to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port accepted on the host.
    pub host_port: u16,
    /// Port the container listens on.
    pub container_port: u16,
}

impl PortMapping {
    /// `iptables` arguments for the DNAT rule, with `action` being `-A` to
    /// append or `-D` to delete.
    #[must_use]
    pub fn dnat_args(&self, action: &str, container_ip: Ipv4Addr) -> Vec<String> {
        let dport = self.host_port.to_string();
        let destination = format!("{container_ip}:{}", self.container_port);
        [
            "-t",
            "nat",
            action,
            "PREROUTING",
            "-p",
            "tcp",
            "-m",
            "tcp",
            "--dport",
            dport.as_str(),
            "-j",
            "DNAT",
            "--to-destination",
            destination.as_str(),
        ]
        .into_iter()
        .map(str::to_owned)
        .collect()
    }
}

impl FromStr for PortMapping {
    type Err = VesselError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VesselError::Malformed {
            what: "port mapping",
            message: format!("expected hostPort:containerPort, got {s:?}"),
        };
        let (host, container) = s.split_once(':').ok_or_else(malformed)?;
        let host_port = host.trim().parse().map_err(|_| malformed())?;
        let container_port = container.trim().parse().map_err(|_| malformed())?;
        if host_port == 0 || container_port == 0 {
            return Err(malformed());
        }
        Ok(Self {
            host_port,
            container_port,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)
    }
}

/// Parses every entry, logging and skipping the malformed ones.
#[must_use]
pub fn parse_all(entries: &[String]) -> Vec<PortMapping> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse() {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                tracing::warn!(entry = %entry, error = %e, "skipping port mapping");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_container_port() {
        let pm: PortMapping = "8080:80".parse().unwrap();
        assert_eq!(pm.host_port, 8080);
        assert_eq!(pm.container_port, 80);
        assert_eq!(pm.to_string(), "8080:80");
    }

    #[test]
    fn rejects_malformed_entries() {
        for bad in ["8080", "8080:80:1", "a:80", "80:", "0:80", "70000:80"] {
            assert!(
                matches!(bad.parse::<PortMapping>(), Err(VesselError::Malformed { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn parse_all_keeps_only_valid_entries() {
        let parsed = parse_all(&["80:80".into(), "bogus".into(), "443:8443".into()]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].container_port, 8443);
    }

    #[test]
    fn dnat_rule_targets_the_container_address() {
        let pm: PortMapping = "8080:80".parse().unwrap();
        let args = pm.dnat_args("-A", Ipv4Addr::new(192, 168, 100, 2));
        assert_eq!(
            args.join(" "),
            "-t nat -A PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.100.2:80"
        );
    }
}
