// Keeper - restarts a plugin runtime according to its restart policy

mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::restart::{RestartDecision, RestartPolicy};
use crate::application::runtime::PluginRuntime;
use crate::domain::PluginState;
use crate::error::{Result, RuntimeError};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info};

/// Summary of a keeper run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperReport {
    /// Attempts started
    pub attempts: u32,
    /// Failed attempts in a row at the end of the run
    pub consecutive_failures: u32,
    /// State the last attempt settled into
    pub last_state: PluginState,
}

/// Keeps one plugin runtime alive
///
/// After every attempt the keeper reads the runtime state and asks the
/// restart policy whether (and when) to start again.
pub struct PluginKeeper {
    runtime: Arc<dyn PluginRuntime>,
    policy: RestartPolicy,
}

impl PluginKeeper {
    pub fn new(runtime: Arc<dyn PluginRuntime>, policy: RestartPolicy) -> Self {
        Self { runtime, policy }
    }

    /// Run attempts until the policy says stop or shutdown is requested
    ///
    /// A running attempt is never interrupted here: shutdown is observed
    /// between attempts and during restart backoff. To end a running attempt,
    /// kill its process (the daemon does so through the process registry).
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<KeeperReport> {
        let identity = self.runtime.identity().to_string();
        let mut report = KeeperReport {
            attempts: 0,
            consecutive_failures: 0,
            last_state: self.runtime.state(),
        };

        info!(identity = %identity, runtime = %self.runtime.runtime_type(), "Keeper started");
        loop {
            if shutdown.is_shutdown() {
                info!(identity = %identity, "Keeper shutting down");
                break;
            }

            report.attempts += 1;
            match self.runtime.start().await {
                Ok(()) => {}
                Err(e @ RuntimeError::AttemptInProgress(_)) => return Err(e),
                Err(e) => error!(identity = %identity, error = %e, "Plugin attempt failed"),
            }

            let state = self.runtime.state();
            report.last_state = state;
            if state == PluginState::Restarting {
                report.consecutive_failures += 1;
            } else {
                report.consecutive_failures = 0;
            }

            if shutdown.is_shutdown() {
                info!(identity = %identity, "Keeper shutting down");
                break;
            }

            match self
                .policy
                .decide(&identity, state, report.consecutive_failures)
            {
                RestartDecision::Stop => break,
                RestartDecision::Restart(delay) => {
                    tokio::select! {
                        _ = sleep(delay) => {},
                        _ = shutdown.wait() => {
                            info!(identity = %identity, "Keeper interrupted during restart backoff");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            identity = %identity,
            attempts = %report.attempts,
            last_state = %report.last_state,
            "Keeper stopped"
        );
        Ok(report)
    }
}
