// Central Error Type for the Plugin Runtime

use thiserror::Error;

/// Runtime-level error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("plugin not started")]
    NotStarted,

    #[error("Attempt already in progress for plugin {0}")]
    AttemptInProgress(String),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    #[error("Relay error: {0}")]
    Relay(#[from] crate::port::RelayError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::port::RegistryError),
}

/// Result type alias using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
