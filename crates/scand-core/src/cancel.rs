//! Cooperative cancellation shared between a session and other tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{ScanError, ScanResult};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation flag owned by a scan session
///
/// Checked at the head of every acquisition loop; sleeps taken through
/// [`CancelFlag::sleep`] wake up as soon as the flag is raised.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new scan
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// `Err(Cancelled)` if the flag is raised
    pub fn check(&self) -> ScanResult<()> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> ScanResult<()> {
        let notified = self.inner.notify.notified();
        let mut notified = std::pin::pin!(notified);
        notified.as_mut().enable();
        self.check()?;

        tokio::select! {
            _ = notified => Err(ScanError::Cancelled),
            _ = tokio::time::sleep(duration) => self.check(),
        }
    }

    /// A handle other tasks can use to raise this flag
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            inner: self.inner.clone(),
        }
    }
}

/// Cloneable handle that raises a session's cancel flag from any task
///
/// The session finishes the transition to `Opened` on its next call.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_completes_without_cancel() {
        let flag = CancelFlag::new();
        flag.sleep(Duration::from_millis(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_interrupts_sleep() {
        let flag = CancelFlag::new();
        let handle = flag.handle();

        let started = Instant::now();
        let waiter = tokio::spawn({
            let flag = flag.clone();
            async move { flag.sleep(Duration::from_secs(30)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ScanError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reset_clears_flag() {
        let flag = CancelFlag::new();
        flag.handle().cancel();
        assert!(flag.check().is_err());
        assert!(flag.sleep(Duration::from_millis(1)).await.is_err());
        flag.reset();
        assert!(flag.check().is_ok());
        assert!(!flag.handle().is_cancelled());
    }
}
