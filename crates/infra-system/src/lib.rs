// Plugin Runtime Infrastructure - System Adapters
// Implements: ProcessLauncher, ProcessRegistry, TaskExecutor

pub mod process_launcher;
pub mod process_table;
pub mod task_executor_impl;

pub use process_launcher::{TokioChildProcess, TokioProcessLauncher};
pub use process_table::ProcessTable;
pub use task_executor_impl::TokioTaskExecutor;
