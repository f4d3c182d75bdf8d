//! Bounded-attempt retry policy.
//!
//! [`attempt`] is a pure higher-order contract: it knows nothing about HTTP,
//! LLMs or parsing. The caller supplies the operation, the maximum number of
//! calls and a delay schedule; the result is either the first success or an
//! [`Exhausted`] carrying the last error.
//!
//! With the default [`Backoff::Exponential`] (1 s base, 30 s cap) and three
//! attempts the wait sequence is 1 s → 2 s, so a chunk never blocks for more
//! than `(max_attempts - 1) × max_ms` plus the calls themselves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Delay schedule between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Always wait `delay_ms`.
    Fixed { delay_ms: u64 },
    /// Wait `base_ms * 2^(retry - 1)`, never more than `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base_ms: 1_000,
            max_ms: 30_000,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1 = the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let exp = retry.saturating_sub(1).min(62);
                let ms = base_ms.saturating_mul(1u64 << exp).min(max_ms);
                Duration::from_millis(ms)
            }
        }
    }

    /// Upper bound of any single delay.
    pub fn max_delay(&self) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { max_ms, .. } => Duration::from_millis(max_ms),
        }
    }
}

/// Every allowed attempt failed.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or `max_attempts` calls have failed.
///
/// `op` receives the 1-based attempt number. Between attempts the task
/// sleeps for `delay_fn(retry)` where `retry` starts at 1. A
/// `max_attempts` of 0 is treated as 1.
pub async fn attempt<T, E, F, Fut, D>(
    mut op: F,
    max_attempts: u32,
    mut delay_fn: D,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: FnMut(u32) -> Duration,
    E: fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut n = 1;

    loop {
        match op(n).await {
            Ok(value) => return Ok(value),
            Err(err) if n >= max_attempts => {
                return Err(Exhausted {
                    attempts: n,
                    last_error: err,
                });
            }
            Err(err) => {
                let delay = delay_fn(n);
                warn!(
                    attempt = n,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                n += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_delay(_: u32) -> Duration {
        Duration::ZERO
    }

    #[test]
    fn exponential_schedule_doubles_and_caps() {
        let b = Backoff::Exponential {
            base_ms: 500,
            max_ms: 3_000,
        };
        assert_eq!(b.delay(1), Duration::from_millis(500));
        assert_eq!(b.delay(2), Duration::from_millis(1_000));
        assert_eq!(b.delay(3), Duration::from_millis(2_000));
        assert_eq!(b.delay(4), Duration::from_millis(3_000));
        assert_eq!(b.delay(60), Duration::from_millis(3_000));
        assert_eq!(b.max_delay(), Duration::from_millis(3_000));
    }

    #[test]
    fn fixed_schedule_is_constant() {
        let b = Backoff::Fixed { delay_ms: 250 };
        assert_eq!(b.delay(1), b.delay(7));
    }

    #[test]
    fn backoff_serialises_tagged() {
        let json = serde_json::to_string(&Backoff::Fixed { delay_ms: 10 }).unwrap();
        assert_eq!(json, r#"{"kind":"fixed","delay_ms":10}"#);
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = attempt(
            |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, String>(42)
                }
            },
            3,
            no_delay,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fails_n_minus_one_times_then_succeeds_with_n_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = attempt(
            |n| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if n < 4 {
                        Err(format!("boom {n}"))
                    } else {
                        Ok(n)
                    }
                }
            },
            4,
            no_delay,
        )
        .await;
        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausts_with_last_error() {
        let result = attempt(
            |n| async move { Err::<(), _>(format!("boom {n}")) },
            3,
            no_delay,
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "boom 3");
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[tokio::test]
    async fn zero_max_attempts_still_calls_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = attempt(
            |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("nope")
                }
            },
            0,
            no_delay,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delay_fn_sees_retry_numbers() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _ = attempt(
            |_| async { Err::<(), _>("x") },
            3,
            move |retry| {
                s.lock().unwrap().push(retry);
                Duration::ZERO
            },
        )
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
