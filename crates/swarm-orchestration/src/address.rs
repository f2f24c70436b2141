//! Advertise-address selection
//!
//! Which address a coordinator should publish is environment-specific: a
//! cloud host advertises its configured address, while a nested/dev topology
//! (where the configured host resolves to loopback) has to pick a real
//! interface instead. The strategy is a trait so deployments with unusual
//! networks can substitute their own policy wholesale.

use async_trait::async_trait;
use remote_executor::{NodeCredential, RemoteExecutor};
use tracing::debug;

use crate::commands::list_interfaces;
use crate::{Error, Result};

/// Strategy for choosing the address a coordinator advertises to joiners
#[async_trait]
pub trait AddressSelector: Send + Sync {
    /// Pick an advertise address by inspecting the node
    async fn select_advertise_addr(
        &self,
        executor: &dyn RemoteExecutor,
        node: &NodeCredential,
    ) -> Result<String>;
}

/// Default strategy: scan the node's interfaces and take the first
/// non-loopback, non-container-bridge address
///
/// Container-runtime bridges are recognized by interface-name class
/// (`docker0`, `br-*`, `veth*`, `virbr*`) rather than by subnet, since bridge
/// subnets are configurable and do not generalize across environments.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceScanSelector;

#[async_trait]
impl AddressSelector for InterfaceScanSelector {
    async fn select_advertise_addr(
        &self,
        executor: &dyn RemoteExecutor,
        node: &NodeCredential,
    ) -> Result<String> {
        let command = list_interfaces();
        let output = executor.exec(node, &command).await?;

        if !output.success() {
            return Err(Error::AddressSelection {
                reason: format!(
                    "interface listing failed with exit code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }

        first_usable_address(&output.stdout).ok_or_else(|| Error::AddressSelection {
            reason: "no non-loopback, non-bridge interface address found".to_string(),
        })
    }
}

/// Parse `ip -o -4 addr show` output and return the first usable address
fn first_usable_address(listing: &str) -> Option<String> {
    for line in listing.lines() {
        // Line shape: "2: eth0    inet 10.0.0.5/24 brd ... scope global eth0"
        let mut fields = line.split_whitespace();
        let _index = fields.next()?;
        let interface = fields.next()?;

        if is_excluded_interface(interface) {
            debug!(interface, "skipping excluded interface");
            continue;
        }

        let addr = fields
            .skip_while(|field| *field != "inet")
            .nth(1)
            .and_then(|cidr| cidr.split('/').next())?;

        if !addr.is_empty() && !addr.starts_with("127.") {
            return Some(addr.to_string());
        }
    }
    None
}

fn is_excluded_interface(name: &str) -> bool {
    name == "lo"
        || name == "docker0"
        || name.starts_with("br-")
        || name.starts_with("veth")
        || name.starts_with("virbr")
}

/// Whether a configured host is a loopback address or name
///
/// Used by the bootstrapper to decide between the configured host and a
/// selector-chosen interface address.
pub(crate) fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
