//! Bounded task executor.
//!
//! Submission never blocks: the task is spawned at once and waits for one of
//! `capacity` permits before it starts running.

use crate::core::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};
use uuid::Uuid;

struct TrackedTask {
    id: Uuid,
    name: String,
    abort: AbortHandle,
}

/// Bounded-concurrency pool for long-running subsystems.
pub struct TaskExecutor {
    capacity: usize,
    permits: Arc<Semaphore>,
    tasks: Mutex<Vec<TrackedTask>>,
    submitted: AtomicU64,
    shut_down: AtomicBool,
}

impl TaskExecutor {
    /// Create an executor running at most `capacity` tasks at once.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            tasks: Mutex::new(Vec::new()),
            submitted: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Submit a task. Its result is available through the returned handle.
    pub fn submit<Fut, T>(&self, name: &str, task: Fut) -> Result<TaskHandle<T>>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ExecutorShutdown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let id = Uuid::new_v4();
        let permits = self.permits.clone();
        let task_name = name.to_string();
        let join = runtime.spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| Error::ExecutorShutdown)?;
            debug!(task = %task_name, "Task acquired executor slot");
            task.await
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.abort.is_finished());
        tasks.push(TrackedTask {
            id,
            name: name.to_string(),
            abort: join.abort_handle(),
        });
        self.submitted.fetch_add(1, Ordering::SeqCst);

        debug!(task = %name, task_id = %id, "Task submitted");
        Ok(TaskHandle {
            id,
            name: name.to_string(),
            join,
        })
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Tasks submitted and not yet finished.
    pub fn active(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.iter().filter(|t| !t.abort.is_finished()).count()
    }

    /// Total tasks ever submitted.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Names of unfinished tasks.
    pub fn active_names(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .iter()
            .filter(|t| !t.abort.is_finished())
            .map(|t| t.name.clone())
            .collect()
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Reject new tasks and abort the tracked ones.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let aborted = tasks.iter().filter(|t| !t.abort.is_finished()).count();
        for task in tasks.drain(..) {
            debug!(task = %task.name, task_id = %task.id, "Aborting task");
            task.abort.abort();
        }
        info!(aborted, "Task executor shut down");
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(crate::coordinator::config::DEFAULT_EXECUTOR_CAPACITY)
    }
}

/// Handle to a submitted task.
pub struct TaskHandle<T> {
    id: Uuid,
    name: String,
    join: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Task id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Abort the task.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the task's result.
    pub async fn join(self) -> Result<T> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::TaskFailed {
                name: self.name,
                reason: "cancelled".to_string(),
            }),
            Err(e) => Err(Error::TaskFailed {
                name: self.name,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_submit_returns_result() {
        let executor = TaskExecutor::new(2);
        let handle = executor.submit("answer", async { Ok(42) }).unwrap();
        assert_eq!(handle.name(), "answer");
        assert_eq!(assert_ok!(handle.join().await), 42);
        assert_eq!(executor.submitted(), 1);
    }

    #[tokio::test]
    async fn test_task_error_is_observable() {
        let executor = TaskExecutor::new(2);
        let handle = executor
            .submit::<_, ()>("failing", async {
                Err(Error::EndpointStart {
                    address: "127.0.0.1:1".to_string(),
                    reason: "denied".to_string(),
                })
            })
            .unwrap();
        let err = assert_err!(handle.join().await);
        assert!(matches!(err, Error::EndpointStart { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_bounds_concurrency() {
        let executor = TaskExecutor::new(2);
        let mut handles = Vec::new();
        for i in 0..3 {
            handles.push(
                executor
                    .submit(&format!("sleeper-{}", i), async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(())
                    })
                    .unwrap(),
            );
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(executor.running(), 2);
        assert_eq!(executor.active(), 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(executor.running(), 1);

        for handle in handles {
            assert_ok!(handle.join().await);
        }
        assert_eq!(executor.active(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_aborts() {
        let executor = TaskExecutor::new(1);
        let handle = executor
            .submit("forever", async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .unwrap();
        tokio::task::yield_now().await;

        executor.shutdown();
        assert!(executor.is_shut_down());
        assert!(matches!(
            executor.submit("late", async { Ok(()) }),
            Err(Error::ExecutorShutdown)
        ));
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, Error::TaskFailed { reason, .. } if reason == "cancelled"));
    }

    #[test]
    fn test_submit_requires_runtime() {
        let executor = TaskExecutor::default();
        assert_eq!(executor.capacity(), 5);
        assert!(matches!(
            executor.submit("orphan", async { Ok(()) }),
            Err(Error::NoRuntime)
        ));
    }
}
