//! Cluster bootstrap state machine
//!
//! Turns N independently-addressed hosts into one coordinated cluster: the
//! coordinator node is initialized (or recognized as already initialized),
//! the address other nodes must join through is computed, and each worker is
//! driven through its join transition. The only cross-operation ordering
//! requirement in the whole engine lives here: the coordinator step must
//! complete, token in hand, strictly before any worker join begins.

use std::sync::Arc;

use remote_executor::{Command, NodeCredential, RemoteExecutor};
use tracing::{debug, info, warn};

use crate::address::{AddressSelector, InterfaceScanSelector, is_loopback_host};
use crate::commands::swarm;
use crate::firewall::{self, MANAGEMENT_PORT};
use crate::{Error, Result};

/// The set of nodes a bootstrap run operates on
///
/// Exactly one coordinator; an empty worker list (single-node cluster) is
/// valid. Built once per invocation and read-only thereafter.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    /// The node that will hold orchestrator management state
    pub coordinator: NodeCredential,
    /// The nodes that join it and run scheduled workloads
    pub workers: Vec<NodeCredential>,
}

/// Worker-role join token obtained from the coordinator
///
/// A capability: any node holding it may join. Held in memory only and never
/// logged; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinToken(String);

impl JoinToken {
    /// Wrap a token string
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the join command only
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for JoinToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JoinToken(<redacted>)")
    }
}

/// A node's local swarm membership state as the orchestrator reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmNodeState {
    /// Member of a cluster
    Active,
    /// Not part of any cluster
    Inactive,
    /// Join in progress or stalled
    Pending,
    /// Cluster state present but locked
    Locked,
    /// Cluster state present but unusable
    Error,
    /// Anything the orchestrator reports that we do not recognize
    Unknown,
}

impl SwarmNodeState {
    fn parse(word: &str) -> Self {
        match word {
            "active" => SwarmNodeState::Active,
            "inactive" => SwarmNodeState::Inactive,
            "pending" => SwarmNodeState::Pending,
            "locked" => SwarmNodeState::Locked,
            "error" => SwarmNodeState::Error,
            _ => SwarmNodeState::Unknown,
        }
    }

    /// A state with stale local cluster data that blocks a fresh join
    fn is_half_initialized(&self) -> bool {
        matches!(
            self,
            SwarmNodeState::Pending | SwarmNodeState::Locked | SwarmNodeState::Error
        )
    }
}

/// Parsed output of the node status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwarmStatus {
    /// Local membership state
    pub state: SwarmNodeState,
    /// Whether this node holds a manager role
    pub is_manager: bool,
}

impl SwarmStatus {
    /// Parse the `{{.Swarm.LocalNodeState}} {{.Swarm.ControlAvailable}}` line
    pub fn parse(line: &str) -> Self {
        let mut fields = line.split_whitespace();
        let state = SwarmNodeState::parse(fields.next().unwrap_or(""));
        let is_manager = fields.next() == Some("true");
        Self { state, is_manager }
    }
}

/// Result of the coordinator-initialization step
#[derive(Debug, Clone)]
pub struct CoordinatorInit {
    /// The address workers join through (bare address, no port)
    pub advertise_addr: String,
    /// The worker-role join token
    pub join_token: JoinToken,
    /// Whether the coordinator was already active (no init was issued)
    pub already_active: bool,
}

/// Outcome of one worker's join transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerJoinOutcome {
    /// The worker joined the cluster
    Joined,
    /// The worker was already a cluster member; nothing was issued
    AlreadyJoined,
    /// The join failed; the batch continues
    Failed {
        /// Why the join failed
        reason: String,
    },
}

/// Aggregated result of a bootstrap run
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    /// The coordinator's advertise address
    pub advertise_addr: String,
    /// Whether the coordinator was already initialized
    pub coordinator_already_active: bool,
    /// Per-worker outcomes, keyed by host
    pub workers: Vec<(String, WorkerJoinOutcome)>,
    /// Non-fatal problems encountered along the way (firewall, partial joins)
    pub warnings: Vec<String>,
}

impl BootstrapReport {
    /// Whether every worker ended up a cluster member
    pub fn fully_joined(&self) -> bool {
        self.workers
            .iter()
            .all(|(_, outcome)| !matches!(outcome, WorkerJoinOutcome::Failed { .. }))
    }
}

/// Drives hosts through the cluster-membership state machine
pub struct ClusterBootstrapper {
    executor: Arc<dyn RemoteExecutor>,
    address_selector: Box<dyn AddressSelector>,
}

impl ClusterBootstrapper {
    /// Create a bootstrapper with the default interface-scan address strategy
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            address_selector: Box::new(InterfaceScanSelector),
        }
    }

    /// Replace the advertise-address selection strategy
    pub fn with_address_selector(mut self, selector: Box<dyn AddressSelector>) -> Self {
        self.address_selector = selector;
        self
    }

    /// Query a node's swarm membership status
    pub async fn node_status(&self, node: &NodeCredential) -> Result<SwarmStatus> {
        let command = swarm::node_status();
        let output = self.executor.exec(node, &command).await?;

        if !output.success() {
            return Err(command_failed(&command, &output));
        }

        Ok(SwarmStatus::parse(output.stdout_trimmed()))
    }

    /// Open the fixed cluster port set on a node, best-effort
    ///
    /// Never fatal: a permissive network with no firewall is a valid state,
    /// so every problem is returned as a warning and bootstrap proceeds.
    pub async fn open_cluster_ports(&self, node: &NodeCredential) -> Vec<String> {
        firewall::open_cluster_ports(self.executor.as_ref(), node).await
    }

    /// Initialize the coordinator, idempotently
    ///
    /// An already-active coordinator yields its existing join token and
    /// previously-chosen advertise address without a second init. Failure to
    /// produce a token is fatal to the whole bootstrap.
    pub async fn initialize_coordinator(&self, node: &NodeCredential) -> Result<CoordinatorInit> {
        let status = self.node_status(node).await?;

        if status.state == SwarmNodeState::Active {
            if !status.is_manager {
                return Err(Error::Validation {
                    reason: format!(
                        "{} is already a worker in another cluster; leave it before using it as coordinator",
                        node.host()
                    ),
                });
            }

            info!(host = node.host(), "coordinator already active, reusing join token");
            let join_token = self.fetch_join_token(node).await?;
            let advertise_addr = self.query_node_addr(node).await?;
            return Ok(CoordinatorInit {
                advertise_addr,
                join_token,
                already_active: true,
            });
        }

        if status.state.is_half_initialized() {
            warn!(
                host = node.host(),
                state = ?status.state,
                "coordinator has stale swarm state, forcing leave before init"
            );
            let _ = self.executor.exec(node, &swarm::leave_force()).await;
        }

        let advertise_addr = self.select_advertise_addr(node).await?;
        info!(
            host = node.host(),
            advertise_addr = %advertise_addr,
            "initializing cluster coordinator"
        );

        let init = swarm::init(&advertise_addr);
        let output = self.executor.exec(node, &init).await?;
        if !output.success() {
            return Err(command_failed(&init, &output));
        }

        let join_token = self.fetch_join_token(node).await?;
        Ok(CoordinatorInit {
            advertise_addr,
            join_token,
            already_active: false,
        })
    }

    /// Drive one worker through its join transition
    ///
    /// Idempotent: an already-active node reports success without re-joining.
    /// A half-initialized node is forced to leave first, to avoid an
    /// orchestrator error on stale local state. Never raises; the caller
    /// aggregates outcomes.
    pub async fn join_worker(
        &self,
        node: &NodeCredential,
        advertise_addr: &str,
        token: &JoinToken,
    ) -> WorkerJoinOutcome {
        let status = match self.node_status(node).await {
            Ok(status) => status,
            Err(e) => {
                return WorkerJoinOutcome::Failed {
                    reason: format!("status query failed: {}", e),
                };
            }
        };

        match status.state {
            SwarmNodeState::Active => {
                info!(host = node.host(), "worker already joined");
                return WorkerJoinOutcome::AlreadyJoined;
            }
            state if state.is_half_initialized() => {
                warn!(
                    host = node.host(),
                    state = ?state,
                    "worker has stale swarm state, forcing leave before join"
                );
                if let Err(e) = self.executor.exec(node, &swarm::leave_force()).await {
                    return WorkerJoinOutcome::Failed {
                        reason: format!("forced leave failed: {}", e),
                    };
                }
            }
            _ => {}
        }

        let remote_addr = format!("{}:{}", advertise_addr, MANAGEMENT_PORT);
        let join = swarm::join(token.as_str(), &remote_addr);
        match self.executor.exec(node, &join).await {
            Ok(output) if output.success() => {
                info!(host = node.host(), "worker joined cluster");
                WorkerJoinOutcome::Joined
            }
            Ok(output) => WorkerJoinOutcome::Failed {
                reason: format!(
                    "join exited {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            },
            Err(e) => WorkerJoinOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Bootstrap the whole topology
    ///
    /// Coordinator failure is fatal; worker-join failures are aggregated into
    /// the report so one broken node never blocks the rest. Worker joins have
    /// no ordering requirement relative to each other.
    pub async fn bootstrap(&self, topology: &ClusterTopology) -> Result<BootstrapReport> {
        let mut warnings = self.open_cluster_ports(&topology.coordinator).await;

        let init = self.initialize_coordinator(&topology.coordinator).await?;

        let mut workers = Vec::with_capacity(topology.workers.len());
        for worker in &topology.workers {
            warnings.extend(self.open_cluster_ports(worker).await);

            let outcome = self
                .join_worker(worker, &init.advertise_addr, &init.join_token)
                .await;
            if let WorkerJoinOutcome::Failed { reason } = &outcome {
                warnings.push(format!("{}: join failed: {}", worker.host(), reason));
            }
            workers.push((worker.host().to_string(), outcome));
        }

        Ok(BootstrapReport {
            advertise_addr: init.advertise_addr,
            coordinator_already_active: init.already_active,
            workers,
            warnings,
        })
    }

    /// Choose the address the coordinator should advertise
    ///
    /// The configured host wins unless it is a loopback address (a nested or
    /// dev topology), in which case the pluggable selector inspects the
    /// node's real interfaces.
    async fn select_advertise_addr(&self, node: &NodeCredential) -> Result<String> {
        if !is_loopback_host(node.host()) {
            return Ok(node.host().to_string());
        }

        debug!(
            host = node.host(),
            "configured host is loopback, scanning interfaces for advertise address"
        );
        self.address_selector
            .select_advertise_addr(self.executor.as_ref(), node)
            .await
    }

    async fn fetch_join_token(&self, node: &NodeCredential) -> Result<JoinToken> {
        let command = swarm::worker_join_token();
        let output = self.executor.exec(node, &command).await?;

        if !output.success() {
            return Err(Error::JoinTokenUnavailable {
                reason: output.stderr.trim().to_string(),
            });
        }

        let token = output.stdout_trimmed();
        if token.is_empty() {
            return Err(Error::JoinTokenUnavailable {
                reason: "coordinator returned an empty token".to_string(),
            });
        }

        Ok(JoinToken::new(token))
    }

    async fn query_node_addr(&self, node: &NodeCredential) -> Result<String> {
        let command = swarm::node_addr();
        let output = self.executor.exec(node, &command).await?;

        if !output.success() {
            return Err(command_failed(&command, &output));
        }

        Ok(output.stdout_trimmed().to_string())
    }
}

fn command_failed(command: &Command, output: &remote_executor::ExecOutput) -> Error {
    Error::CommandFailed {
        command: command.to_shell_string(),
        exit_code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    }
}
