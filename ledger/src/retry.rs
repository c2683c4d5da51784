//! Execute fallible operations with a bounded number of attempts and a fixed delay.
//!
//! [Policy::execute] is the only retry primitive in the workspace. Callers decide
//! which failures are worth another attempt by passing a predicate, so the same
//! policy can retry readiness probes on any transport failure while treating a
//! ledger rejection as final.

use crate::{signal::Signal, units::millis};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, future::Future, num::NonZeroUsize, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Terminal outcome of [Policy::execute].
#[derive(Error, Debug)]
pub enum Error<E> {
    /// Every attempt failed with a retryable error.
    #[error("exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },
    /// An attempt failed with an error the predicate did not accept.
    #[error("{0}")]
    Aborted(E),
    /// Shutdown was signaled before the operation completed.
    #[error("stopped")]
    Stopped,
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Maximum number of times the operation is invoked.
    pub attempts: NonZeroUsize,
    /// Time to wait after a failed attempt before the next one.
    #[serde(rename = "delay_ms", with = "millis")]
    pub delay: Duration,
}

impl Policy {
    /// Create a new [Policy].
    pub const fn new(attempts: NonZeroUsize, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Invoke `operation` until it succeeds, fails with an error rejected by
    /// `retryable`, or `attempts` are used up.
    ///
    /// The delay is only awaited between attempts. Both the delay and any
    /// in-flight attempt are abandoned as soon as `stopped` resolves.
    pub async fn execute<T, E, R, F, Fut>(
        &self,
        stopped: &Signal,
        retryable: R,
        mut operation: F,
    ) -> Result<T, Error<E>>
    where
        E: Display,
        R: Fn(&E) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.get();
        let mut attempt = 0;
        loop {
            // `select!` creates every branch future before polling, so check first
            if stopped.is_stopped() {
                return Err(Error::Stopped);
            }
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = stopped.clone() => return Err(Error::Stopped),
                result = operation() => result,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !retryable(&err) {
                return Err(Error::Aborted(err));
            }
            if attempt >= attempts {
                return Err(Error::Exhausted {
                    attempts,
                    last: err,
                });
            }
            debug!(attempt, attempts, delay = ?self.delay, error = %err, "attempt failed");
            tokio::select! {
                biased;
                _ = stopped.clone() => return Err(Error::Stopped),
                _ = tokio::time::sleep(self.delay) => {},
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mocks, signal::Signaler, NZUsize};
    use anchor_macros::test_traced;
    use std::fmt;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Transient,
        Fatal,
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn transient(err: &Failure) -> bool {
        *err == Failure::Transient
    }

    /// Virtual time advances on millisecond ticks.
    fn assert_elapsed(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test_traced]
    fn test_exhausts_after_configured_attempts() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let policy = Policy::new(NZUsize!(5), Duration::from_secs(10));

            let mut started = Vec::new();
            let result: Result<(), _> = policy
                .execute(&signal, transient, || {
                    started.push(Instant::now());
                    async { Err(Failure::Transient) }
                })
                .await;

            match result {
                Err(Error::Exhausted { attempts, last }) => {
                    assert_eq!(attempts, 5);
                    assert_eq!(last, Failure::Transient);
                }
                other => panic!("unexpected result: {:?}", other),
            }
            assert_eq!(started.len(), 5);
            for pair in started.windows(2) {
                assert_elapsed(pair[1] - pair[0], Duration::from_secs(10));
            }
        });
    }

    #[test_traced]
    fn test_returns_after_first_success() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let policy = Policy::new(NZUsize!(5), Duration::from_secs(4));

            let start = Instant::now();
            let mut calls = 0;
            let result = policy
                .execute(&signal, transient, || {
                    calls += 1;
                    let outcome = if calls <= 2 {
                        Err(Failure::Transient)
                    } else {
                        Ok(calls)
                    };
                    async move { outcome }
                })
                .await;

            assert_eq!(result.unwrap(), 3);
            assert_eq!(calls, 3);
            assert_elapsed(start.elapsed(), Duration::from_secs(8));
        });
    }

    #[test_traced]
    fn test_fatal_error_aborts_immediately() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let policy = Policy::new(NZUsize!(10), Duration::from_secs(1));

            let mut calls = 0;
            let result: Result<(), _> = policy
                .execute(&signal, transient, || {
                    calls += 1;
                    async { Err(Failure::Fatal) }
                })
                .await;

            assert!(matches!(result, Err(Error::Aborted(Failure::Fatal))));
            assert_eq!(calls, 1);
        });
    }

    #[test_traced]
    fn test_stop_interrupts_delay() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (signaler, signal) = Signaler::new();
            let policy = Policy::new(NZUsize!(10), Duration::from_secs(60));

            let mut signaler = Some(signaler);
            let mut calls = 0;
            let start = Instant::now();
            let result: Result<(), _> = policy
                .execute(&signal, transient, || {
                    calls += 1;
                    if let Some(signaler) = signaler.take() {
                        signaler.signal();
                    }
                    async { Err(Failure::Transient) }
                })
                .await;

            assert!(matches!(result, Err(Error::Stopped)));
            assert_eq!(calls, 1);
            assert!(start.elapsed() < Duration::from_secs(60));
        });
    }

    #[test_traced]
    fn test_stopped_before_first_attempt() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (signaler, signal) = Signaler::new();
            signaler.signal();
            let policy = Policy::new(NZUsize!(3), Duration::from_secs(1));

            let mut calls = 0;
            let result: Result<(), Error<Failure>> = policy
                .execute(&signal, transient, || {
                    calls += 1;
                    async { Ok(()) }
                })
                .await;

            assert!(matches!(result, Err(Error::Stopped)));
            assert_eq!(calls, 0);
        });
    }

    #[test_traced]
    fn test_stop_interrupts_attempt_in_flight() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (signaler, signal) = Signaler::new();
            let policy = Policy::new(NZUsize!(3), Duration::from_secs(1));
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                signaler.signal();
            });

            let mut calls = 0;
            let start = Instant::now();
            let result: Result<(), Error<Failure>> = policy
                .execute(&signal, transient, || {
                    calls += 1;
                    futures::future::pending()
                })
                .await;

            assert!(matches!(result, Err(Error::Stopped)));
            assert_eq!(calls, 1);
            assert_elapsed(start.elapsed(), Duration::from_secs(5));
        });
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: Policy = serde_yaml::from_str("attempts: 20\ndelay_ms: 4000\n").unwrap();
        assert_eq!(policy, Policy::new(NZUsize!(20), Duration::from_secs(4)));

        let zero = serde_yaml::from_str::<Policy>("attempts: 0\ndelay_ms: 1\n");
        assert!(zero.is_err());
    }
}
