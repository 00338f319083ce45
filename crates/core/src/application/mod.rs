// Application Layer - Plugin lifecycle use cases

pub mod constants;
pub mod keeper;
pub mod restart;
pub mod runtime;

// Re-exports
pub use keeper::{shutdown_channel, KeeperReport, PluginKeeper, ShutdownSender, ShutdownToken};
pub use restart::{RestartDecision, RestartPolicy};
pub use runtime::{
    completion_channel, CompletionSender, CompletionSignal, PluginRuntime, RuntimeDeps,
    RuntimeSupervisor, SupervisorConfig,
};
