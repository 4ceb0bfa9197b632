//! Detached background work (cache revalidation).

use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Tasks spawned by the worker that outlive the event that started them.
///
/// Nothing on a response path ever joins these; the set only exists so the
/// worker can wait for them (tests, orderly shutdown) or abort them at
/// termination without leaking failures.
#[derive(Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task. The future must handle its own errors.
    pub async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().await;
        // Reap whatever already finished so the set doesn't grow unbounded.
        while let Some(result) = set.try_join_next() {
            log_join(result);
        }
        debug!(task = name, "Spawning background task");
        set.spawn(task);
    }

    /// Number of tasks not yet reaped.
    pub async fn len(&self) -> usize {
        self.set.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait until every spawned task has finished, including tasks spawned
    /// while waiting.
    ///
    /// The lock is only held to swap the set out, so `spawn` never waits on a
    /// running task.
    pub async fn wait_idle(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.set.lock().await);
            if set.is_empty() {
                return;
            }
            while let Some(result) = set.join_next().await {
                log_join(result);
            }
        }
    }

    /// Abort every running task.
    pub async fn abort_all(&self) {
        let mut set = self.set.lock().await;
        set.abort_all();
        while let Some(result) = set.join_next().await {
            log_join(result);
        }
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("Background task cancelled"),
        Err(e) => warn!(error = %e, "Background task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_wait_idle() {
        let tasks = BackgroundTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            tasks
                .spawn("count", async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        tasks.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_spawn_while_waiting_does_not_block() {
        let tasks = BackgroundTasks::new();
        let gate = Arc::new(Notify::new());
        let parked = gate.clone();
        let counter = Arc::new(AtomicUsize::new(0));

        tasks.spawn("parked", async move { parked.notified().await }).await;

        let spawner = async {
            let counter = counter.clone();
            let spawned = tokio::time::timeout(
                Duration::from_secs(2),
                tasks.spawn("late", async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;
            gate.notify_one();
            spawned
        };

        let ((), spawned) = tokio::join!(tasks.wait_idle(), spawner);
        assert!(spawned.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_abort_all() {
        let tasks = BackgroundTasks::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();

        tasks
            .spawn("slow", async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        tasks.abort_all().await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("boom", async { panic!("boom") }).await;
        tasks.wait_idle().await;
        assert!(tasks.is_empty().await);
    }
}
