/*
 * This file is part of the Sitora hosting platform.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Implemented by error types that can distinguish transient external
/// failures (worth retrying) from permanent ones.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff: `base * 2^attempt`, capped at `cap`, at most
/// `max_attempts` tries in total.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Policy for payment gateway calls.
    pub fn gateway() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(8),
            max_attempts: 5,
        }
    }

    /// Policy for a single provisioning step.
    pub fn provision_step(cap_secs: u64, max_attempts: u32) -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(cap_secs),
            max_attempts,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Runs `operation` until it succeeds, returns a permanent error, or the
/// attempt budget is exhausted. Only errors reporting `is_transient()` are
/// retried.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Transient failure in {operation_name} (attempt {}/{}), retrying in {:?}: {e}",
                    attempt + 1,
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("permanent")]
        Permanent,
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(8),
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff(
            &BackoffPolicy {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(2),
                max_attempts: 5,
            },
            "test",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Permanent) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff(
            &BackoffPolicy {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(2),
                max_attempts: 3,
            },
            "test",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_with_backoff(
            &BackoffPolicy {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(2),
                max_attempts: 5,
            },
            "test",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
