// Plugin Runtime Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Plugin attempt state
///
/// There is no explicit `Running` value: a plugin is "running" between a
/// successful spawn and the end of its exit wait, while the state still reads
/// `Launching`. `Pending` and `Restarting` are the two terminal states of an
/// attempt and both may start a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    /// Idle, last attempt (if any) ended cleanly
    #[default]
    Pending,
    /// Attempt in progress
    Launching,
    /// Last attempt ended abnormally, eligible for a retry
    Restarting,
}

impl PluginState {
    /// True for the states an attempt settles into after cleanup
    pub fn is_terminal(self) -> bool {
        matches!(self, PluginState::Pending | PluginState::Restarting)
    }

    /// Check whether moving from `self` to `next` is a legal transition
    ///
    /// Staying in the same state is always allowed. `Pending -> Restarting`
    /// covers the exit reconciliation that runs after a clean relay finished.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;

        self == next
            || matches!(
                (self, next),
                (Pending, Launching)
                    | (Restarting, Launching)
                    | (Launching, Pending)
                    | (Launching, Restarting)
                    | (Pending, Restarting)
            )
    }

    /// Validate and return the next state
    pub fn transition(self, next: PluginState) -> Result<PluginState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Pending => write!(f, "PENDING"),
            PluginState::Launching => write!(f, "LAUNCHING"),
            PluginState::Restarting => write!(f, "RESTARTING"),
        }
    }
}

/// Runtime kind, used to dispatch between plugin runtime implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum RuntimeType {
    /// Plugin runs as a child process of this daemon
    Local,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Local => write!(f, "local"),
        }
    }
}
