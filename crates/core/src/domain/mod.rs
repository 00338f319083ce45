// Domain Layer - Plugin runtime entities

pub mod environment;
pub mod error;
pub mod plugin;

// Re-exports
pub use environment::ChildEnvironment;
pub use error::DomainError;
pub use plugin::{PluginState, RuntimeType};
