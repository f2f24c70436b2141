//! # Swarm orchestration
//!
//! Turns a set of independently-addressed hosts into one coordinated swarm
//! cluster and drives service-lifecycle transitions (scale, restart,
//! rollback, remove) to convergence.
//!
//! Everything here issues commands through the [`remote_executor`] seam and
//! parses the orchestrator CLI's textual output; the orchestrator's own
//! gossip and consensus protocols are opaque external services. A scripted
//! fake executor is all a test needs to exercise any component.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use remote_executor::{NodeCredential, SshExecutor};
//! use swarm_orchestration::{ClusterBootstrapper, ClusterTopology};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let topology = ClusterTopology {
//!     coordinator: NodeCredential::decode("...")?,
//!     workers: vec![],
//! };
//!
//! let bootstrapper = ClusterBootstrapper::new(Arc::new(SshExecutor::new()));
//! let report = bootstrapper.bootstrap(&topology).await?;
//! println!("coordinator at {}", report.advertise_addr);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod address;
mod bootstrap;
mod commands;
mod discovery;
mod firewall;
mod lifecycle;
mod naming;
mod poll;

pub use address::{AddressSelector, InterfaceScanSelector};
pub use bootstrap::{
    BootstrapReport, ClusterBootstrapper, ClusterTopology, CoordinatorInit, JoinToken,
    SwarmNodeState, SwarmStatus, WorkerJoinOutcome,
};
pub use commands::swarm;
pub use discovery::{ServiceDiscovery, ServiceRef};
pub use firewall::{
    CLUSTER_PORTS, FirewallStrategy, MANAGEMENT_PORT, PortSpec, Protocol, detect_strategy,
};
pub use lifecycle::{
    BatchReport, OpOutcome, ServiceLifecycleManager, StackRemoval, parse_replicas,
};
pub use naming::{accessory_stack_name, full_service_name, short_service_name, stack_name};
pub use poll::{PollConfig, poll_until};

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Remote transport errors
    #[error("remote execution error: {0}")]
    Remote(#[from] remote_executor::Error),

    /// A remote command ran and reported failure
    #[error("command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        /// The command that failed, as rendered for the remote shell
        command: String,
        /// The remote exit code
        exit_code: i32,
        /// Captured stderr for diagnosis
        stderr: String,
    },

    /// Bad local input, caught before any remote call
    #[error("validation error: {reason}")]
    Validation {
        /// Why the input was rejected
        reason: String,
    },

    /// Service not found in the stack
    #[error("service '{service}' not found in stack '{stack}'")]
    ServiceNotFound {
        /// The stack that was searched
        stack: String,
        /// The short service name that was requested
        service: String,
        /// Short names of the services that do exist, for suggestions
        available: Vec<String>,
    },

    /// Stack not found on the cluster
    #[error("stack '{stack}' not found")]
    StackNotFound {
        /// The missing stack
        stack: String,
    },

    /// No usable advertise address could be determined
    #[error("address selection failed: {reason}")]
    AddressSelection {
        /// Why no address qualified
        reason: String,
    },

    /// The coordinator could not produce a worker join token
    #[error("could not obtain worker join token: {reason}")]
    JoinTokenUnavailable {
        /// Why the token is unavailable
        reason: String,
    },

    /// A convergence poll exhausted its attempt budget
    ///
    /// Success of the underlying mutation is not implied false; observation
    /// could not confirm completion in time.
    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout {
        /// What was being waited on
        what: String,
        /// How many attempts were made
        attempts: u32,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
