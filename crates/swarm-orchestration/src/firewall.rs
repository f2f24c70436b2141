//! Cluster port opening via capability-detected firewall front-ends
//!
//! The cluster needs a fixed, closed set of ports between nodes. Which
//! firewall front-end manages them differs per distribution, so the tool is
//! probed once per node and the whole port list is driven through the first
//! strategy found. A node with no firewall at all is a valid, common state;
//! nothing in this module is ever fatal.

use std::sync::Arc;

use remote_executor::{Command, NodeCredential, RemoteExecutor};
use tracing::{debug, warn};

use crate::Result;
use crate::commands::which;

/// Transport protocol of a cluster port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// One port of the cluster's fixed port set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    /// Port number
    pub port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}

/// The management-plane RPC port workers join through
pub const MANAGEMENT_PORT: u16 = 2377;

/// The closed set of ports the cluster needs between nodes
///
/// 2377/tcp management-plane RPC, 7946/tcp+udp node gossip, 4789/udp overlay
/// data plane. No other ports are part of this contract.
pub const CLUSTER_PORTS: [PortSpec; 4] = [
    PortSpec {
        port: MANAGEMENT_PORT,
        protocol: Protocol::Tcp,
    },
    PortSpec {
        port: 7946,
        protocol: Protocol::Tcp,
    },
    PortSpec {
        port: 7946,
        protocol: Protocol::Udp,
    },
    PortSpec {
        port: 4789,
        protocol: Protocol::Udp,
    },
];

/// A firewall front-end that can open the cluster ports
pub trait FirewallStrategy: Send + Sync {
    /// The tool this strategy drives
    fn name(&self) -> &'static str;

    /// Command that opens one port
    fn open_command(&self, spec: &PortSpec) -> Command;

    /// Command that applies pending rules, for tools that stage them
    fn finalize_command(&self) -> Option<Command> {
        None
    }
}

/// ufw front-end
struct Ufw;

impl FirewallStrategy for Ufw {
    fn name(&self) -> &'static str {
        "ufw"
    }

    fn open_command(&self, spec: &PortSpec) -> Command {
        Command::new("ufw")
            .arg("allow")
            .arg(format!("{}/{}", spec.port, spec.protocol.as_str()))
            .privileged()
    }
}

/// firewalld front-end
struct FirewallCmd;

impl FirewallStrategy for FirewallCmd {
    fn name(&self) -> &'static str {
        "firewall-cmd"
    }

    fn open_command(&self, spec: &PortSpec) -> Command {
        Command::new("firewall-cmd")
            .arg("--permanent")
            .arg(format!("--add-port={}/{}", spec.port, spec.protocol.as_str()))
            .privileged()
    }

    fn finalize_command(&self) -> Option<Command> {
        // Permanent rules only take effect after a reload.
        Some(Command::new("firewall-cmd").arg("--reload").privileged())
    }
}

/// Raw packet-filter fallback
struct Iptables;

impl FirewallStrategy for Iptables {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn open_command(&self, spec: &PortSpec) -> Command {
        Command::new("iptables")
            .arg("-I")
            .arg("INPUT")
            .arg("-p")
            .arg(spec.protocol.as_str())
            .arg("--dport")
            .arg(spec.port.to_string())
            .arg("-j")
            .arg("ACCEPT")
            .privileged()
    }
}

/// Probe for an available firewall front-end, in priority order
///
/// Returns `None` when no tool is present (a permissive network).
pub async fn detect_strategy(
    executor: &dyn RemoteExecutor,
    node: &NodeCredential,
) -> Result<Option<Arc<dyn FirewallStrategy>>> {
    let candidates: [Arc<dyn FirewallStrategy>; 3] =
        [Arc::new(Ufw), Arc::new(FirewallCmd), Arc::new(Iptables)];

    for strategy in candidates {
        let probe = which(strategy.name());
        let output = executor.exec(node, &probe).await?;
        if output.success() {
            debug!(host = node.host(), tool = strategy.name(), "firewall front-end detected");
            return Ok(Some(strategy));
        }
    }

    Ok(None)
}

/// Open the fixed cluster port set on a node, best-effort
///
/// Every problem, including an unreachable host, becomes a returned warning;
/// bootstrap proceeds regardless.
pub(crate) async fn open_cluster_ports(
    executor: &dyn RemoteExecutor,
    node: &NodeCredential,
) -> Vec<String> {
    let mut warnings = Vec::new();

    let strategy = match detect_strategy(executor, node).await {
        Ok(Some(strategy)) => strategy,
        Ok(None) => {
            warnings.push(format!(
                "{}: no firewall front-end found; assuming permissive network",
                node.host()
            ));
            return warnings;
        }
        Err(e) => {
            warnings.push(format!("{}: firewall probing failed: {}", node.host(), e));
            return warnings;
        }
    };

    for spec in &CLUSTER_PORTS {
        let command = strategy.open_command(spec);
        match executor.exec(node, &command).await {
            Ok(output) if output.success() => {}
            Ok(output) => warnings.push(format!(
                "{}: could not open {}/{} via {}: {}",
                node.host(),
                spec.port,
                spec.protocol.as_str(),
                strategy.name(),
                output.stderr.trim()
            )),
            Err(e) => warnings.push(format!(
                "{}: could not open {}/{} via {}: {}",
                node.host(),
                spec.port,
                spec.protocol.as_str(),
                strategy.name(),
                e
            )),
        }
    }

    if let Some(finalize) = strategy.finalize_command() {
        match executor.exec(node, &finalize).await {
            Ok(output) if output.success() => {}
            Ok(output) => warnings.push(format!(
                "{}: firewall reload failed: {}",
                node.host(),
                output.stderr.trim()
            )),
            Err(e) => warnings.push(format!("{}: firewall reload failed: {}", node.host(), e)),
        }
    }

    for warning in &warnings {
        warn!("{}", warning);
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_port_set_is_closed() {
        assert_eq!(CLUSTER_PORTS.len(), 4);
        assert!(CLUSTER_PORTS.contains(&PortSpec {
            port: 2377,
            protocol: Protocol::Tcp
        }));
        assert!(CLUSTER_PORTS.contains(&PortSpec {
            port: 7946,
            protocol: Protocol::Tcp
        }));
        assert!(CLUSTER_PORTS.contains(&PortSpec {
            port: 7946,
            protocol: Protocol::Udp
        }));
        assert!(CLUSTER_PORTS.contains(&PortSpec {
            port: 4789,
            protocol: Protocol::Udp
        }));
    }

    #[test]
    fn test_ufw_command_rendering() {
        let cmd = Ufw.open_command(&CLUSTER_PORTS[0]);
        assert_eq!(cmd.to_shell_string(), "ufw allow 2377/tcp");
        assert!(cmd.is_privileged());
    }

    #[test]
    fn test_firewalld_stages_and_reloads() {
        let cmd = FirewallCmd.open_command(&PortSpec {
            port: 4789,
            protocol: Protocol::Udp,
        });
        assert_eq!(
            cmd.to_shell_string(),
            "firewall-cmd --permanent --add-port=4789/udp"
        );
        let reload = FirewallCmd.finalize_command().unwrap();
        assert_eq!(reload.to_shell_string(), "firewall-cmd --reload");
    }

    #[test]
    fn test_iptables_command_rendering() {
        let cmd = Iptables.open_command(&PortSpec {
            port: 7946,
            protocol: Protocol::Udp,
        });
        assert_eq!(
            cmd.to_shell_string(),
            "iptables -I INPUT -p udp --dport 7946 -j ACCEPT"
        );
    }
}
