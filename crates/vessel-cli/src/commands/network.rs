//! `vessel network`: create, list, and remove container networks.

use clap::{Args, Subcommand};
use vessel_common::config::VesselConfig;
use vessel_common::constants::BRIDGE_DRIVER;
use vessel_net::manager::NetworkManager;

use crate::output;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub action: NetworkAction,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkAction {
    /// Create a network and its host-side bridge.
    Create {
        /// Network driver.
        #[arg(long, default_value = BRIDGE_DRIVER)]
        driver: String,
        /// Subnet in CIDR notation (e.g. `192.168.100.0/24`).
        #[arg(long)]
        subnet: String,
        /// Network name; also the bridge interface name.
        name: String,
    },
    /// List known networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network and release its gateway.
    #[command(alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the registry cannot be loaded or the operation fails.
#[allow(clippy::print_stdout)]
pub fn execute(config: &VesselConfig, args: NetworkArgs) -> anyhow::Result<()> {
    let manager = NetworkManager::init(config)?;
    match args.action {
        NetworkAction::Create {
            driver,
            subnet,
            name,
        } => {
            let network = manager.create_network(&driver, &subnet, &name)?;
            println!("{}", network.name);
        }
        NetworkAction::List => {
            print!("{}", output::network_table(&manager.list_networks()));
        }
        NetworkAction::Remove { name } => {
            manager.delete_network(&name)?;
            println!("{name}");
        }
    }
    Ok(())
}
