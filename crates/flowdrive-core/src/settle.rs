//! Bounded poll-with-timeout settlement utility.
//!
//! Waiting for the engine to converge (busy after a clock advance, idle
//! after command dispatch) is always a bounded poll against a quiescence
//! condition -- never an unbounded loop or an ad-hoc sleep. Timeout expiry
//! is an unrecoverable test failure: the expected transition did not occur
//! within its window.

use std::time::Duration;

use thiserror::Error;

/// A settlement condition was not reached within its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("'{what}' not reached within {timeout:?}")]
pub struct SettleTimeout {
    /// Human-readable name of the condition that was polled.
    pub what: &'static str,
    /// The bound that expired.
    pub timeout: Duration,
}

/// Poll `condition` every `interval` until it holds or `timeout` elapses.
///
/// The condition is checked once immediately, so an already-settled engine
/// costs no sleep. `what` names the condition in the timeout diagnostic.
pub async fn poll_until<F>(
    what: &'static str,
    timeout: Duration,
    interval: Duration,
    mut condition: F,
) -> Result<(), SettleTimeout>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(SettleTimeout { what, timeout });
        }
        tokio::time::sleep_until(std::cmp::min(deadline, now + interval)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const INTERVAL: Duration = Duration::from_millis(5);

    #[tokio::test(start_paused = true)]
    async fn already_true_condition_returns_immediately() {
        let polls = AtomicU32::new(0);
        poll_until("noop", Duration::from_secs(1), INTERVAL, || {
            polls.fetch_add(1, Ordering::SeqCst);
            true
        })
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn condition_becoming_true_settles() {
        let polls = AtomicU32::new(0);
        poll_until("third time", Duration::from_secs(1), INTERVAL, || {
            polls.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_true_condition_times_out() {
        let err = poll_until("never", Duration::from_millis(50), INTERVAL, || false)
            .await
            .unwrap_err();
        assert_eq!(err.what, "never");
        assert_eq!(err.timeout, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_diagnostic_names_condition() {
        let err = poll_until("engine idle", Duration::from_millis(10), INTERVAL, || false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("engine idle"));
    }
}
