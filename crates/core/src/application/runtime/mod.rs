// Plugin runtime - one plugin process, supervised attempt by attempt

mod completion;
mod supervisor;

pub use completion::{completion_channel, CompletionSender, CompletionSignal};
pub use supervisor::{RuntimeDeps, RuntimeSupervisor, SupervisorConfig};

use async_trait::async_trait;

use crate::domain::{PluginState, RuntimeType};
use crate::error::Result;

/// Plugin runtime trait
///
/// Implementations:
/// - RuntimeSupervisor: plugin runs as a local child process
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    /// Kind of runtime, for dispatch between implementations
    fn runtime_type(&self) -> RuntimeType;

    /// Identity of the supervised plugin
    fn identity(&self) -> &str;

    /// Current state; the retry signal after an attempt
    fn state(&self) -> PluginState;

    /// Run one full attempt, returning when it has been cleaned up
    ///
    /// # Errors
    /// - Setup failures (spawn, stream acquisition, registration)
    /// - Relay failures reported by the stdio broker
    /// - RuntimeError::AttemptInProgress if another attempt is running
    async fn start(&self) -> Result<()>;

    /// Completion signal of the latest attempt
    ///
    /// # Errors
    /// - RuntimeError::NotStarted if `start` was never called
    fn wait(&self) -> Result<CompletionSignal>;
}
