use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How a scheduled timer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Elapsed,
    /// The service shut down before the delay elapsed.
    Shutdown,
}

/// Runs delayed callbacks for every pending request of one bus.
///
/// Timers are independent of message dispatch: a callback fires even when
/// no traffic arrives. Shutting the service down runs every pending
/// callback with [`TimerOutcome::Shutdown`].
#[derive(Debug)]
pub struct TimerService {
    tracker: TaskTracker,
    token: CancellationToken,
}

/// Cancels one scheduled timer. Cancelled callbacks never run.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        }
    }

    /// Run `f` after `delay`. Must be called within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce(TimerOutcome) + Send + 'static,
    {
        let service = self.token.clone();
        let token = self.token.child_token();
        let task_token = token.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => f(TimerOutcome::Elapsed),
                _ = task_token.cancelled() => {
                    if service.is_cancelled() {
                        f(TimerOutcome::Shutdown);
                    }
                }
            }
        });

        TimerHandle { token }
    }

    /// Number of timers still pending.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn shutdown(&self) {
        self.tracker.close();
        self.token.cancel();
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let timers = TimerService::new();
        let (tx, rx) = oneshot::channel();
        timers.schedule(Duration::from_secs(30), move |outcome| {
            let _ = tx.send(outcome);
        });

        assert_eq!(rx.await.unwrap(), TimerOutcome::Elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = timers.schedule(Duration::from_secs(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_pending_timers() {
        let timers = TimerService::new();
        let (tx, rx) = oneshot::channel();
        timers.schedule(Duration::from_secs(30), move |outcome| {
            let _ = tx.send(outcome);
        });

        timers.shutdown();
        assert_eq!(rx.await.unwrap(), TimerOutcome::Shutdown);
    }
}
