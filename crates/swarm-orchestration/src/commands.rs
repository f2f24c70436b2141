//! Typed constructors for the consumed orchestrator command surface
//!
//! One constructor per remote verb. Higher layers never build shell text by
//! hand; they assemble a [`Command`] here and hand it to the executor, which
//! makes every verb unit-testable without a live session and removes string
//! interpolation from the command path entirely.

use remote_executor::Command;

/// Constructors for the swarm orchestrator CLI verbs
pub mod swarm {
    use super::Command;

    /// Query the node's local swarm state and whether it is a manager
    pub fn node_status() -> Command {
        Command::new("docker")
            .arg("info")
            .arg("--format")
            .arg("{{.Swarm.LocalNodeState}} {{.Swarm.ControlAvailable}}")
    }

    /// Query the address a coordinator advertises to joining nodes
    pub fn node_addr() -> Command {
        Command::new("docker")
            .arg("info")
            .arg("--format")
            .arg("{{.Swarm.NodeAddr}}")
    }

    /// Initialize this node as the cluster coordinator
    pub fn init(advertise_addr: &str) -> Command {
        Command::new("docker")
            .arg("swarm")
            .arg("init")
            .arg("--advertise-addr")
            .arg(advertise_addr)
    }

    /// Fetch the worker-role join token from an active coordinator
    pub fn worker_join_token() -> Command {
        Command::new("docker")
            .arg("swarm")
            .arg("join-token")
            .arg("-q")
            .arg("worker")
    }

    /// Join an existing cluster as a worker
    pub fn join(token: &str, remote_addr: &str) -> Command {
        Command::new("docker")
            .arg("swarm")
            .arg("join")
            .arg("--token")
            .arg(token)
            .arg(remote_addr)
    }

    /// Leave the cluster, discarding local swarm state
    pub fn leave_force() -> Command {
        Command::new("docker").arg("swarm").arg("leave").arg("--force")
    }

    /// List the fully-qualified service names in a stack, one per line
    pub fn stack_services(stack: &str) -> Command {
        Command::new("docker")
            .arg("stack")
            .arg("services")
            .arg(stack)
            .arg("--format")
            .arg("{{.Name}}")
    }

    /// List the tasks of a stack (header line included)
    pub fn stack_tasks(stack: &str) -> Command {
        Command::new("docker").arg("stack").arg("ps").arg(stack)
    }

    /// Scale a service to a fixed replica count
    pub fn scale(full_name: &str, replicas: u32) -> Command {
        Command::new("docker")
            .arg("service")
            .arg("scale")
            .arg(format!("{}={}", full_name, replicas))
    }

    /// Force-redeploy a service without changing its image
    pub fn force_update(full_name: &str) -> Command {
        Command::new("docker")
            .arg("service")
            .arg("update")
            .arg("--force")
            .arg(full_name)
    }

    /// Revert a service to its previously deployed spec
    pub fn rollback(full_name: &str) -> Command {
        Command::new("docker").arg("service").arg("rollback").arg(full_name)
    }

    /// Tear down every service in a stack
    pub fn stack_rm(stack: &str) -> Command {
        Command::new("docker").arg("stack").arg("rm").arg(stack)
    }
}

/// List the node's global-scope IPv4 interface addresses, one per line
pub fn list_interfaces() -> Command {
    Command::new("ip")
        .arg("-o")
        .arg("-4")
        .arg("addr")
        .arg("show")
        .arg("scope")
        .arg("global")
}

/// Probe whether a tool exists on the remote PATH
pub fn which(tool: &str) -> Command {
    Command::new("command").arg("-v").arg(tool)
}
