//! Network driver abstraction.
//!
//! A driver decides how a network is realised on the host and how an
//! endpoint's link is plugged into it. The manager dispatches on the
//! driver name stored with each network.

pub mod bridge;

use ipnetwork::Ipv4Network;
use vessel_common::error::Result;

use crate::network::{Endpoint, Network};

pub use bridge::BridgeDriver;

/// Host-side realisation of networks and endpoint links.
pub trait NetworkDriver: Send + Sync {
    /// Name under which the driver is registered.
    fn name(&self) -> &str;

    /// Creates the host infrastructure for a network.
    ///
    /// `gateway` is the gateway address with the subnet prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be created. Partially created
    /// infrastructure is removed before returning.
    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network>;

    /// Removes the host infrastructure of a network.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the network could not be removed.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Creates the endpoint's link and plugs its host end into the network.
    ///
    /// Fills in `endpoint.device` and, when known, `endpoint.mac_address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created or attached.
    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()>;

    /// Removes the endpoint's link. A link that is already gone is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing link cannot be removed.
    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()>;
}
