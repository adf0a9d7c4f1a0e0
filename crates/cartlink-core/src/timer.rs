//! The connect deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A one-shot deadline armed for a single connect attempt.
///
/// Clones share state. Cancelling is effective at most once; later calls
/// are no-ops.
#[derive(Debug, Clone)]
pub struct ConnectTimer {
    deadline: Instant,
    duration: Duration,
    token: CancellationToken,
    cancelled: Arc<AtomicBool>,
}

impl ConnectTimer {
    /// Arm a timer that expires `duration` from now.
    pub fn arm(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
            duration,
            token: CancellationToken::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The armed duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Resolve when the deadline passes.
    ///
    /// Never resolves once the timer has been cancelled.
    pub async fn expired(&self) {
        tokio::select! {
            _ = self.token.cancelled() => std::future::pending::<()>().await,
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// Cancel the timer. Returns `true` only for the call that cancelled it.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Whether the timer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_duration() {
        let timer = ConnectTimer::arm(Duration::from_secs(15));
        let start = Instant::now();
        timer.expired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let timer = ConnectTimer::arm(Duration::from_secs(1));
        assert!(timer.cancel());

        let fired = tokio::time::timeout(Duration::from_secs(5), timer.expired()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn test_double_cancel_is_noop() {
        let timer = ConnectTimer::arm(Duration::from_secs(1));
        let clone = timer.clone();
        assert!(timer.cancel());
        assert!(!clone.cancel());
        assert!(!timer.cancel());
        assert!(clone.is_cancelled());
    }
}
