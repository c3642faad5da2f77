//! Generic poll-until-target loop.
//!
//! A refresh function reports either a pending state name or the target
//! value. The loop succeeds once the target has been observed
//! `continuous_target_occurrence` times in a row and fails when the deadline
//! passes or the refresh function errors.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::debug;

/// Interval, streak length and overall bound of a poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between refreshes.
    pub interval: Duration,
    /// Consecutive target observations required before succeeding.
    pub continuous_target_occurrence: u32,
    /// Overall time budget.
    pub timeout: Duration,
}

/// One refresh result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Observation<T> {
    /// Not there yet; carries the state name for diagnostics.
    Pending(&'static str),
    /// The target state, with the value observed.
    Target(T),
}

/// Errors raised by [`poll_until`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError<E> {
    /// The deadline passed before the target streak completed.
    #[error("timed out after {timeout:?} (last state: {last_state})")]
    Timeout {
        /// Budget that was exhausted.
        timeout: Duration,
        /// Last observed state name.
        last_state: &'static str,
    },
    /// The refresh function failed.
    #[error("refresh failed: {0}")]
    Refresh(E),
}

/// Calls `refresh` every `policy.interval` until it reports the target
/// `policy.continuous_target_occurrence` times in a row.
///
/// A pending observation resets the streak. The value from the final target
/// observation is returned. Neither a refresh nor the pause between
/// refreshes runs past the deadline.
///
/// # Errors
///
/// Returns [`WaitError::Refresh`] as soon as `refresh` fails and
/// [`WaitError::Timeout`] when the deadline passes.
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut refresh: F) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>, E>>,
{
    let deadline = Instant::now() + policy.timeout;
    let required = policy.continuous_target_occurrence.max(1);
    let mut streak = 0_u32;
    let mut last_state = "unknown";

    loop {
        let Ok(observed) = timeout_at(deadline, refresh()).await else {
            break;
        };
        match observed.map_err(WaitError::Refresh)? {
            Observation::Target(value) => {
                streak = streak.saturating_add(1);
                last_state = "target";
                debug!(streak, required, "target state observed");
                if streak >= required {
                    return Ok(value);
                }
            }
            Observation::Pending(state) => {
                streak = 0;
                last_state = state;
                debug!(state, "still pending");
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        sleep(policy.interval.min(remaining)).await;
    }

    Err(WaitError::Timeout {
        timeout: policy.timeout,
        last_state,
    })
}
