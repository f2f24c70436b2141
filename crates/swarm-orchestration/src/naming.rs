//! Deterministic cluster naming
//!
//! Stack and service names are pure functions of the project and environment
//! identifiers, so every invocation addresses the same remote objects without
//! any shared naming state. The orchestrator itself only accepts the
//! fully-qualified `{stack}_{short}` form on its command surface.

/// Cluster-scope stack name for a project in an environment
pub fn stack_name(project: &str, environment: &str) -> String {
    format!("{}_{}", project, environment)
}

/// Stack name for the accessory services of an environment
///
/// Accessories (databases, caches, proxies) deploy and tear down as their own
/// stack so application rollouts never touch them.
pub fn accessory_stack_name(project: &str, environment: &str) -> String {
    format!("{}_{}_accessories", project, environment)
}

/// Fully-qualified service name: `{stack}_{short}`
pub fn full_service_name(stack: &str, short: &str) -> String {
    format!("{}_{}", stack, short)
}

/// Strip the stack prefix from a fully-qualified service name
///
/// Returns `None` when the name does not belong to the stack.
pub fn short_service_name<'a>(stack: &str, full: &'a str) -> Option<&'a str> {
    full.strip_prefix(stack)?.strip_prefix('_')
}
