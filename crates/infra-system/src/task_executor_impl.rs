// Task executor implementation
// reason: tokio::spawn, with a semaphore when the daemon caps relay concurrency
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use plugin_runtime_core::port::task_executor::{Task, TaskExecutor};

/// Runs tasks on the ambient tokio runtime
///
/// With a cap, at most `max_concurrent` tasks run at once and the rest wait
/// for a permit. A supervised plugin needs two concurrent relay tasks, so a
/// cap of one would stall every attempt.
#[derive(Clone, Default)]
pub struct TokioTaskExecutor {
    limiter: Option<Arc<Semaphore>>,
}

impl TokioTaskExecutor {
    /// Create an executor
    ///
    /// # Arguments
    /// * `max_concurrent` - Concurrency cap (0 = unlimited)
    pub fn new(max_concurrent: usize) -> Self {
        let limiter = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self { limiter }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Permits currently free (None when unbounded)
    pub fn available_permits(&self) -> Option<usize> {
        self.limiter.as_ref().map(|limiter| limiter.available_permits())
    }
}

impl TaskExecutor for TokioTaskExecutor {
    fn submit(&self, name: &'static str, task: Task) -> JoinHandle<()> {
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let _permit = match limiter {
                Some(limiter) => match limiter.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        warn!(task = %name, error = %e, "Executor closed, dropping task");
                        return;
                    }
                },
                None => None,
            };

            debug!(task = %name, "Task started");
            task.await;
            debug!(task = %name, "Task finished");
        })
    }
}
