// Task Executor Port
// Background execution of units of work (stdout/stderr relay loops)

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

/// A unit of work submitted to the executor
pub type Task = BoxFuture<'static, ()>;

/// Task Executor trait
///
/// Implementations:
/// - TokioTaskExecutor: tokio::spawn with an optional concurrency cap
pub trait TaskExecutor: Send + Sync {
    /// Run `task` concurrently with the caller
    ///
    /// # Arguments
    /// * `name` - Short task name for diagnostics
    /// * `task` - Future to drive to completion
    ///
    /// The returned handle resolves once the task has finished.
    fn submit(&self, name: &'static str, task: Task) -> JoinHandle<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Spawns on the ambient tokio runtime and records submissions
    #[derive(Default)]
    pub struct CountingTaskExecutor {
        submitted: AtomicUsize,
        names: Mutex<Vec<&'static str>>,
    }

    impl CountingTaskExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn submitted(&self) -> usize {
            self.submitted.load(Ordering::SeqCst)
        }

        pub fn names(&self) -> Vec<&'static str> {
            self.names.lock().unwrap().clone()
        }
    }

    impl TaskExecutor for CountingTaskExecutor {
        fn submit(&self, name: &'static str, task: Task) -> JoinHandle<()> {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            self.names.lock().unwrap().push(name);
            tokio::spawn(task)
        }
    }
}
