// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry for operations whose success depends on telemetry that has
//! not necessarily arrived yet.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

/// Repeatedly invokes `operation` until it succeeds or the wall-clock budget
/// `time` is exhausted.
///
/// The deadline is computed once, up front; elapsed wall-clock time governs
/// termination, not the attempt count. Between attempts the retry sleeps a
/// fixed `time / 20` slice. The backoff is deliberately neither exponential
/// nor jittered: budgets here are test budgets in the single-digit-seconds
/// range against local stub processes, and a constant slice keeps the worst
/// case overshoot at one slice past the deadline.
///
/// Attempts are strictly sequential; there is no cancellation of an attempt
/// in flight. When the budget runs out, the error of the final attempt is
/// returned unwrapped.
pub async fn retry<T, E, F, Fut>(mut operation: F, time: Duration) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let until = Instant::now() + time;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let now = Instant::now();
                if now > until {
                    return Err(error);
                }
                debug!(
                    "Attempt {attempt} failed, retrying for up to {:?}",
                    until - now
                );
                sleep(time / 20).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn resolves_once_the_operation_succeeds() {
        let attempts = AtomicUsize::new(0);
        let value = retry(
            || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(anyhow!("not yet"))
                } else {
                    Ok(42)
                }
            },
            Duration::from_millis(500),
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn rejects_with_the_original_error_after_the_deadline() {
        let started = std::time::Instant::now();
        let result: Result<(), anyhow::Error> = retry(
            || async { Err(anyhow!("not yet")) },
            Duration::from_millis(100),
        )
        .await;

        let elapsed = started.elapsed();
        assert_eq!(result.unwrap_err().to_string(), "not yet");
        assert!(elapsed >= Duration::from_millis(100));
        // Terminates roughly at the deadline, never hangs.
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn an_immediately_successful_operation_needs_one_attempt() {
        let attempts = AtomicUsize::new(0);
        let value: Result<&str, anyhow::Error> = retry(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok("done")
            },
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(value.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
