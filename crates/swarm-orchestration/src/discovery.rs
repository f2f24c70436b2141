//! Service name resolution against the live cluster
//!
//! Deterministic naming (see [`crate::naming`]) says what a service *should*
//! be called; this module checks what actually exists on the coordinator and
//! resolves short names to existence-checked fully-qualified names.

use std::sync::Arc;

use remote_executor::{NodeCredential, RemoteExecutor};
use tracing::debug;

use crate::commands::swarm;
use crate::naming::{full_service_name, short_service_name};
use crate::{Error, Result};

/// A resolved service name triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    /// The owning stack
    pub stack_name: String,
    /// The short name within the stack
    pub short_name: String,
    /// The fully-qualified name the orchestrator accepts
    pub full_name: String,
}

impl ServiceRef {
    /// Build a reference from a stack and short name
    pub fn new(stack: impl Into<String>, short: impl Into<String>) -> Self {
        let stack_name = stack.into();
        let short_name = short.into();
        let full_name = full_service_name(&stack_name, &short_name);
        Self {
            stack_name,
            short_name,
            full_name,
        }
    }
}

/// Resolves short service names against the coordinator's view of a stack
pub struct ServiceDiscovery {
    executor: Arc<dyn RemoteExecutor>,
    coordinator: NodeCredential,
}

impl ServiceDiscovery {
    /// Create a discovery handle bound to the coordinator node
    pub fn new(executor: Arc<dyn RemoteExecutor>, coordinator: NodeCredential) -> Self {
        Self {
            executor,
            coordinator,
        }
    }

    /// Whether the stack currently has any services deployed
    pub async fn exists(&self, stack: &str) -> Result<bool> {
        match self.list_services(stack).await {
            Ok(services) => Ok(!services.is_empty()),
            Err(Error::StackNotFound { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// List every service in a stack
    pub async fn list_services(&self, stack: &str) -> Result<Vec<ServiceRef>> {
        let command = swarm::stack_services(stack);
        let output = self.executor.exec(&self.coordinator, &command).await?;

        if !output.success() {
            if output.stderr.to_lowercase().contains("nothing found") {
                return Err(Error::StackNotFound {
                    stack: stack.to_string(),
                });
            }
            return Err(Error::CommandFailed {
                command: command.to_shell_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let services: Vec<ServiceRef> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|full| {
                short_service_name(stack, full).map(|short| ServiceRef {
                    stack_name: stack.to_string(),
                    short_name: short.to_string(),
                    full_name: full.to_string(),
                })
            })
            .collect();

        debug!(stack, count = services.len(), "listed stack services");
        Ok(services)
    }

    /// Resolve a short name to an existence-checked reference
    ///
    /// A miss carries the short names that do exist in the stack as data, so
    /// a presentation layer can render suggestions however it chooses.
    pub async fn require_service(&self, stack: &str, short: &str) -> Result<ServiceRef> {
        let services = self.list_services(stack).await?;

        services
            .iter()
            .find(|service| service.short_name == short)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound {
                stack: stack.to_string(),
                service: short.to_string(),
                available: services.into_iter().map(|s| s.short_name).collect(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_ref_derives_full_name() {
        let service = ServiceRef::new("myapp_prod", "db");
        assert_eq!(service.full_name, "myapp_prod_db");
    }
}
