//! Bounded convergence polling
//!
//! Every "wait until the cluster catches up" check in this crate goes through
//! one combinator: run an async predicate up to a fixed number of attempts
//! with a fixed sleep between them. The attempt bound is the cancellation
//! mechanism; no external cancel signal is assumed mid-poll.

use std::future::Future;
use std::time::Duration;

use async_io::Timer;
use tracing::debug;

use crate::{Error, Result};

/// Polling parameters for a convergence check
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Sleep between attempts
    pub interval: Duration,
    /// Maximum number of predicate evaluations
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

/// Poll `probe` until it reports true or the attempt budget is exhausted
///
/// Returns the 1-based attempt on which the predicate held. A predicate that
/// never holds is evaluated exactly `max_attempts` times before
/// [`Error::Timeout`] is returned. A probe error aborts the poll immediately.
pub async fn poll_until<F, Fut>(config: &PollConfig, what: &str, mut probe: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=config.max_attempts {
        if probe().await? {
            debug!(what, attempt, "condition reached");
            return Ok(attempt);
        }

        if attempt < config.max_attempts {
            debug!(
                what,
                attempt,
                max_attempts = config.max_attempts,
                "condition not reached, waiting"
            );
            Timer::after(config.interval).await;
        }
    }

    Err(Error::Timeout {
        what: what.to_string(),
        attempts: config.max_attempts,
    })
}
