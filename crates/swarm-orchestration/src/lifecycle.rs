//! Service lifecycle management
//!
//! Issues desired-state mutations (scale, restart, rollback, remove) against
//! the coordinator and polls observed state until convergence or a bounded
//! timeout. A remote-side rejection is an outcome, not an error: batch
//! operations continue past individual failures and aggregate a tally, so one
//! broken service never blocks visibility or action on the rest.
//!
//! This component provides no intrinsic locking; callers that need
//! at-most-one-in-flight semantics per service must serialize above it.

use std::sync::Arc;

use remote_executor::{Command, ExecOutput, NodeCredential, RemoteExecutor};
use tracing::{info, warn};

use crate::commands::swarm;
use crate::discovery::{ServiceDiscovery, ServiceRef};
use crate::poll::{PollConfig, poll_until};
use crate::{Error, Result};

/// Result of a single lifecycle mutation
///
/// `success=false` means the orchestrator rejected the mutation; transport
/// problems surface as errors instead.
#[derive(Debug, Clone)]
pub struct OpOutcome {
    /// Whether the orchestrator accepted the mutation
    pub success: bool,
    /// The orchestrator's own words, for diagnosis or display
    pub message: String,
}

impl OpOutcome {
    fn from_output(output: &ExecOutput) -> Self {
        let message = if output.success() {
            output.stdout_trimmed().to_string()
        } else {
            let stderr = output.stderr.trim();
            if stderr.is_empty() {
                output.stdout_trimmed().to_string()
            } else {
                stderr.to_string()
            }
        };
        Self {
            success: output.success(),
            message,
        }
    }
}

/// Result of a stack removal
#[derive(Debug, Clone)]
pub struct StackRemoval {
    /// Outcome of the removal command itself
    pub outcome: OpOutcome,
    /// Whether the stack's tasks were observed to drain within the poll
    /// budget; `false` only delays dependent cleanup, the removal stands
    pub drained: bool,
}

/// Aggregated tally of a batch operation
///
/// Every failure is individually recorded (service name plus reason) so a
/// partial failure is never silent.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Services whose mutation was accepted
    pub succeeded: Vec<String>,
    /// Services whose mutation failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    /// Whether every service in the batch succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, service: &ServiceRef, result: Result<OpOutcome>) {
        match result {
            Ok(outcome) if outcome.success => self.succeeded.push(service.short_name.clone()),
            Ok(outcome) => {
                warn!(service = %service.full_name, reason = %outcome.message, "operation failed");
                self.failed.push((service.short_name.clone(), outcome.message));
            }
            Err(e) => {
                warn!(service = %service.full_name, reason = %e, "operation failed");
                self.failed.push((service.short_name.clone(), e.to_string()));
            }
        }
    }
}

/// Validate a replica count before any remote call
///
/// Zero is a valid target (scale to nothing); negative or non-numeric input
/// is a local validation error.
pub fn parse_replicas(input: &str) -> Result<u32> {
    let trimmed = input.trim();
    if trimmed.starts_with('-') {
        return Err(Error::Validation {
            reason: format!("replica count cannot be negative: {}", trimmed),
        });
    }
    trimmed.parse::<u32>().map_err(|_| Error::Validation {
        reason: format!("replica count must be a non-negative integer: {}", trimmed),
    })
}

/// Issues lifecycle mutations and polls them to convergence
pub struct ServiceLifecycleManager {
    executor: Arc<dyn RemoteExecutor>,
    coordinator: NodeCredential,
    discovery: ServiceDiscovery,
    poll: PollConfig,
}

impl ServiceLifecycleManager {
    /// Create a manager bound to the coordinator node
    pub fn new(executor: Arc<dyn RemoteExecutor>, coordinator: NodeCredential) -> Self {
        let discovery = ServiceDiscovery::new(executor.clone(), coordinator.clone());
        Self {
            executor,
            coordinator,
            discovery,
            poll: PollConfig::default(),
        }
    }

    /// Replace the convergence polling parameters
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// The discovery handle this manager resolves names through
    pub fn discovery(&self) -> &ServiceDiscovery {
        &self.discovery
    }

    /// Scale a service to a fixed replica count
    pub async fn scale(&self, service: &ServiceRef, replicas: u32) -> Result<OpOutcome> {
        info!(service = %service.full_name, replicas, "scaling service");
        self.issue(&swarm::scale(&service.full_name, replicas)).await
    }

    /// Force-redeploy a service without an image change
    pub async fn restart(&self, service: &ServiceRef) -> Result<OpOutcome> {
        info!(service = %service.full_name, "restarting service");
        self.issue(&swarm::force_update(&service.full_name)).await
    }

    /// Revert a service to its previously deployed spec
    pub async fn rollback(&self, service: &ServiceRef) -> Result<OpOutcome> {
        info!(service = %service.full_name, "rolling back service");
        self.issue(&swarm::rollback(&service.full_name)).await
    }

    /// Tear down a whole stack and wait for its tasks to drain
    ///
    /// The removal is considered to have succeeded once issued; the poll only
    /// determines how soon dependent cleanup (volume removal, redeploys of
    /// the same stack name) may safely proceed.
    pub async fn remove_stack(&self, stack: &str) -> Result<StackRemoval> {
        info!(stack, "removing stack");
        let outcome = self.issue(&swarm::stack_rm(stack)).await?;
        if !outcome.success {
            return Ok(StackRemoval {
                outcome,
                drained: false,
            });
        }

        let drained = match poll_until(&self.poll, "stack tasks to drain", || {
            self.stack_is_drained(stack)
        })
        .await
        {
            Ok(_) => true,
            Err(Error::Timeout { attempts, .. }) => {
                warn!(
                    stack,
                    attempts, "stack tasks did not drain within the poll budget"
                );
                false
            }
            Err(other) => return Err(other),
        };

        Ok(StackRemoval { outcome, drained })
    }

    /// Restart every service in a stack, continuing past failures
    pub async fn restart_all(&self, stack: &str) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for service in self.discovery.list_services(stack).await? {
            let result = self.restart(&service).await;
            report.record(&service, result);
        }
        Ok(report)
    }

    /// Scale every service in a stack to the same replica count
    pub async fn scale_all(&self, stack: &str, replicas: u32) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for service in self.discovery.list_services(stack).await? {
            let result = self.scale(&service, replicas).await;
            report.record(&service, result);
        }
        Ok(report)
    }

    /// Roll back every service in a stack, continuing past failures
    pub async fn rollback_all(&self, stack: &str) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for service in self.discovery.list_services(stack).await? {
            let result = self.rollback(&service).await;
            report.record(&service, result);
        }
        Ok(report)
    }

    /// Issue a mutation and fold its remote result into an outcome
    async fn issue(&self, command: &Command) -> Result<OpOutcome> {
        let output = self.executor.exec(&self.coordinator, command).await?;
        Ok(OpOutcome::from_output(&output))
    }

    /// Whether the stack's task listing is down to its persistent header line
    async fn stack_is_drained(&self, stack: &str) -> Result<bool> {
        let command = swarm::stack_tasks(stack);
        let output = self.executor.exec(&self.coordinator, &command).await?;

        if !output.success() {
            // A fully removed stack no longer lists at all.
            if output.stderr.to_lowercase().contains("nothing found") {
                return Ok(true);
            }
            return Err(Error::CommandFailed {
                command: command.to_shell_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let lines = output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        Ok(lines <= 1)
    }
}
