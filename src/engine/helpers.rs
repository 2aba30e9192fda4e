use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::entities::{Ride, Transition};
use crate::error::Error;

/// Exponential backoff for transient failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "millis")]
    pub base: Duration,
    #[serde(with = "millis")]
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(50),
            max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), with up to 50% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << exponent).min(self.max);

        let jitter_ms = (delay.as_millis() as u64) / 2;
        if jitter_ms == 0 {
            return delay;
        }

        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Runs `op` until it succeeds, fails permanently, or the attempts run out. Only
/// `Error::is_transient` failures are retried; contention never is.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;

    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempt,
                    policy.attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::timeout())?
}

/// Fails fast with `InvalidTransition` when `transition` cannot leave the ride's current status.
pub fn ensure_admissible(ride: &Ride, transition: Transition) -> Result<(), Error> {
    if transition.admits(ride.status) {
        return Ok(());
    }

    Err(Error::invalid_transition(format!(
        "cannot {} a ride that is {}",
        transition, ride.status
    )))
}

/// Free text accepted from clients, in characters.
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_MESSAGE_LEN: usize = 1000;
pub const MAX_COMMENT_LEN: usize = 500;
pub const MAX_ADDRESS_LEN: usize = 300;
/// Intermediate stops per ride.
pub const MAX_STOPS: usize = 5;

/// Trims `text`, rejecting it when longer than `max` characters.
pub fn bounded_text(label: &str, text: &str, max: usize) -> Result<String, Error> {
    let text = text.trim();

    if text.chars().count() > max {
        return Err(Error::invalid_input(format!(
            "{} is longer than {} characters",
            label, max
        )));
    }

    Ok(text.to_string())
}

pub fn ensure_stops(count: usize) -> Result<(), Error> {
    if count > MAX_STOPS {
        return Err(Error::invalid_input(format!(
            "at most {} stops are allowed",
            MAX_STOPS
        )));
    }

    Ok(())
}

/// Turns a guard rejection into `InvalidTransition` for callers that did not race for the
/// ride itself but found it moved on.
pub fn moved_on(err: Error, transition: Transition) -> Error {
    if err.is_ride_already_taken() {
        return Error::invalid_transition(format!("cannot {}: {}", transition, err.message));
    }

    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::database("connection reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn contention_is_never_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Error> = with_retry(&fast(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ride_already_taken()) }
        })
        .await;

        assert!(result.unwrap_err().is_ride_already_taken());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Error> = with_retry(&fast(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::upstream("down")) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_futures_time_out() {
        let result: Result<(), Error> = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap_err().kind, crate::error::ErrorKind::Timeout);
    }

    #[test]
    fn long_text_is_rejected_after_trimming() {
        let padded = format!("  {}  ", "a".repeat(10));
        assert_eq!(bounded_text("reason", &padded, 10).unwrap(), "a".repeat(10));

        let err = bounded_text("reason", &"ñ".repeat(11), 10).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);

        assert!(ensure_stops(MAX_STOPS).is_ok());
        assert!(ensure_stops(MAX_STOPS + 1).is_err());
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            attempts: 10,
            base: Duration::from_millis(100),
            max: Duration::from_millis(400),
        };

        assert!(policy.backoff(1) >= Duration::from_millis(100));
        assert!(policy.backoff(8) <= Duration::from_millis(600));
    }
}
