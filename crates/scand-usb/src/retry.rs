//! Bounded retry with cancellable backoff

use std::future::Future;
use std::time::Duration;

use scand_core::{CancelFlag, ScanResult};
use tracing::trace;

/// How often and how patiently an operation is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait between consecutive attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Run `op` until it yields a value, fails, or the attempts run out
    ///
    /// `op` receives the attempt number and returns `Ok(None)` to ask for
    /// another try. Exhaustion gives `Ok(None)`; errors end the loop at once.
    pub async fn retry<T, F, Fut>(&self, cancel: &CancelFlag, mut op: F) -> ScanResult<Option<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ScanResult<Option<T>>>,
    {
        let mut attempts = self.attempts();
        while let Some(attempt) = attempts.next(cancel).await? {
            if let Some(value) = op(attempt).await? {
                return Ok(Some(value));
            }
            trace!(attempt, max = self.max_attempts, "Retrying");
        }
        Ok(None)
    }

    /// Start counting attempts under this policy
    ///
    /// For loops whose body borrows state mutably, where [`retry`](Self::retry)
    /// cannot hold the borrow across attempts.
    ///
    /// ```ignore
    /// let mut attempts = policy.attempts();
    /// while let Some(n) = attempts.next(&cancel).await? {
    ///     if poll(n).await? {
    ///         return Ok(());
    ///     }
    /// }
    /// Err(ScanError::DeviceBusy("gave up".into()))
    /// ```
    pub fn attempts(&self) -> Attempts {
        Attempts {
            policy: *self,
            made: 0,
        }
    }
}

/// Attempt counter driven by a retry loop
#[derive(Debug)]
pub struct Attempts {
    policy: RetryPolicy,
    made: u32,
}

impl Attempts {
    /// Number of the next attempt, or `None` once the policy is exhausted
    ///
    /// Every attempt after the first waits for the backoff; the wait ends
    /// early with `Cancelled` if the flag is raised.
    pub async fn next(&mut self, cancel: &CancelFlag) -> ScanResult<Option<u32>> {
        cancel.check()?;
        if self.made >= self.policy.max_attempts {
            return Ok(None);
        }
        if self.made > 0 && !self.policy.backoff.is_zero() {
            cancel.sleep(self.policy.backoff).await?;
        }
        self.made += 1;
        Ok(Some(self.made))
    }

    /// Attempts handed out so far
    pub fn made(&self) -> u32 {
        self.made
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scand_core::ScanError;

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let cancel = CancelFlag::new();
        let mut attempts = RetryPolicy::new(3, Duration::ZERO).attempts();
        let mut seen = Vec::new();
        while let Some(n) = attempts.next(&cancel).await.unwrap() {
            seen.push(n);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(attempts.made(), 3);
        assert_eq!(attempts.next(&cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retry_stops_at_first_value() {
        let cancel = CancelFlag::new();
        let policy = RetryPolicy::new(10, Duration::ZERO);
        let result = policy
            .retry(&cancel, |n| async move { Ok((n == 4).then_some(n * 10)) })
            .await
            .unwrap();
        assert_eq!(result, Some(40));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_and_errors() {
        let cancel = CancelFlag::new();
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let result: Option<()> = policy
            .retry(&cancel, |_| {
                calls += 1;
                async { Ok(None) }
            })
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(calls, 3);

        let err = policy
            .retry(&cancel, |_| async { Err::<Option<()>, _>(ScanError::NoMem("pool".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoMem(_)));
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let cancel = CancelFlag::new();
        let mut attempts = RetryPolicy::new(5, Duration::from_secs(30)).attempts();
        assert_eq!(attempts.next(&cancel).await.unwrap(), Some(1));

        let handle = cancel.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let result = attempts.next(&cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
        assert_eq!(attempts.made(), 1);
    }
}
