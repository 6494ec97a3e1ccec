//! Detached background work tied to the server's shutdown lifecycle.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Notify;

use crate::middleware::panic_message;

#[derive(Default)]
struct Tracker {
    pending: AtomicUsize,
    idle: Notify,
}

/// Deregisters its task when dropped, whether the task returned or panicked.
struct TaskGuard {
    tracker: Arc<Tracker>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.tracker.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

/// Launches fire-and-forget tasks that cannot take the process down and can
/// be waited on during shutdown.
#[derive(Clone, Default)]
pub struct BackgroundRunner {
    tracker: Arc<Tracker>,
}

impl BackgroundRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` on its own task and returns immediately. A panic inside
    /// `work` is logged and contained.
    pub fn launch<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.pending.fetch_add(1, Ordering::AcqRel);
        let guard = TaskGuard {
            tracker: self.tracker.clone(),
        };

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                tracing::error!(
                    task = name,
                    panic = %panic_message(panic.as_ref()),
                    "background task panicked"
                );
            }
        });
    }

    /// Number of launched tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tracker.pending.load(Ordering::Acquire)
    }

    /// Waits until every launched task has finished.
    pub async fn wait(&self) {
        loop {
            let idle = self.tracker.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Like [`BackgroundRunner::wait`] but gives up after `deadline`. Returns
    /// `false` if tasks were still running.
    pub async fn wait_timeout(&self, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_wait_with_no_tasks_returns() {
        let runner = BackgroundRunner::new();
        runner.wait().await;
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_covers_successful_and_panicking_tasks() {
        let runner = BackgroundRunner::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let total = 20;
        for i in 0..total {
            let completed = completed.clone();
            runner.launch("test", async move {
                tokio::time::sleep(Duration::from_millis(5 * (i % 4) as u64)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                if i % 3 == 0 {
                    panic!("task {i} failed");
                }
            });
        }

        runner.wait().await;
        assert_eq!(completed.load(Ordering::SeqCst), total);
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn test_launch_does_not_block_caller() {
        let runner = BackgroundRunner::new();
        let (release, released) = oneshot::channel::<()>();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        runner.launch("blocked", async move {
            let _ = released.await;
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(runner.pending(), 1);
        assert!(!runner.wait_timeout(Duration::from_millis(20)).await);
        assert!(!finished.load(Ordering::SeqCst));

        release.send(()).unwrap();
        assert!(runner.wait_timeout(Duration::from_secs(5)).await);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_does_not_reach_launcher() {
        let runner = BackgroundRunner::new();
        runner.launch("explodes", async {
            panic!("boom");
        });
        runner.wait().await;

        // The runner remains usable after a contained panic.
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        runner.launch("after", async move {
            flag.store(true, Ordering::SeqCst);
        });
        runner.wait().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_clones_share_tracking() {
        let runner = BackgroundRunner::new();
        let clone = runner.clone();
        let (release, released) = oneshot::channel::<()>();

        clone.launch("shared", async move {
            let _ = released.await;
        });
        assert_eq!(runner.pending(), 1);

        release.send(()).unwrap();
        runner.wait().await;
        assert_eq!(clone.pending(), 0);
    }
}
