// Plugin Runtime Core - Domain Logic, Ports & Runtime Supervisor
// NO infrastructure dependencies (hexagonal layout)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{Result, RuntimeError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
