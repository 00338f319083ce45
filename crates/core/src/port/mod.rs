// Port Layer - Interfaces for external collaborators of the supervisor

pub mod id_provider; // For deterministic testing
pub mod process;
pub mod process_registry;
pub mod stdio_broker;
pub mod task_executor;

// Re-exports
pub use id_provider::IdProvider;
pub use process::{
    ChildProcess, ChildStreams, ExecutionError, LaunchCommand, LaunchSpec, OutputReader,
    ProcessExit, ProcessLauncher, StdinWriter,
};
pub use process_registry::{ProcessRegistry, RegistryError};
pub use stdio_broker::{RelayError, StdioBroker, StdioSession, StdioStream};
pub use task_executor::{Task, TaskExecutor};
