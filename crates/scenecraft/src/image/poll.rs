//! Submit/poll state machine shared by the asynchronous providers.
//!
//! A submission either completes immediately or goes `Pending`; from there
//! the status endpoint is polled every `interval` until it reports
//! completion, an explicit failure, or `max_attempts` polls have been spent.

use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// What one status check observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    Completed(T),
    /// Terminal failure or cancellation, with the provider's error text.
    Failed(String),
}

/// Polls `check` until it leaves `Pending`.
///
/// `check` receives the 1-based attempt number and is called at most
/// `policy.max_attempts` times; each call is preceded by one `interval`
/// sleep. Transport errors from `check` end the loop immediately.
pub async fn poll_until_complete<T, F, Fut>(
    provider: &'static str,
    policy: PollPolicy,
    mut check: F,
) -> Result<T, GenerationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, GenerationError>>,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;

        match check(attempt).await? {
            PollStatus::Pending => {
                debug!(
                    "{} still pending (attempt {}/{})",
                    provider, attempt, policy.max_attempts
                );
            }
            PollStatus::Completed(value) => return Ok(value),
            PollStatus::Failed(message) => {
                return Err(GenerationError::upstream(provider, message));
            }
        }
    }

    Err(GenerationError::Timeout {
        provider,
        attempts: policy.max_attempts,
    })
}
