// Background task queue
//
// Work that must not delay the response (cache persistence, refreshes,
// version bumps) is spawned here. The queue is bounded: when every permit is
// taken the task is dropped with a warning rather than queued. Failures are
// logged only. The host calls `drain()` before releasing the request.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::EdgeError;
use crate::metrics::EdgeMetrics;

pub struct BackgroundTasks {
    tasks: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    max_tasks: usize,
    dropped: AtomicU64,
}

impl BackgroundTasks {
    pub fn new(max_tasks: usize) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            permits: Arc::new(Semaphore::new(max_tasks)),
            max_tasks,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Tasks spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.max_tasks - self.permits.available_permits()
    }

    /// Tasks rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn `task`; returns false when the queue is full and the task was dropped
    pub fn spawn<F>(&self, label: &'static str, task: F) -> bool
    where
        F: Future<Output = Result<(), EdgeError>> + Send + 'static,
    {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EdgeMetrics::global().record_background_task("dropped");
                tracing::warn!(
                    task = label,
                    max_tasks = self.max_tasks,
                    "Background queue full, dropping task"
                );
                return false;
            }
        };

        self.tasks.lock().spawn(async move {
            let _permit = permit;
            match task.await {
                Ok(()) => EdgeMetrics::global().record_background_task("ok"),
                Err(e) => {
                    EdgeMetrics::global().record_background_task("failed");
                    tracing::warn!(task = label, error = %e, "Background task failed");
                }
            }
        });
        true
    }

    /// Wait for every spawned task; returns how many completed
    pub async fn drain(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut completed = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(()) => completed += 1,
                Err(e) => {
                    EdgeMetrics::global().record_background_task("panicked");
                    tracing::error!(error = %e, "Background task panicked");
                }
            }
        }
        completed
    }
}
