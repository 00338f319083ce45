// Restart logic for supervised plugins
use crate::application::constants::{
    DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_RESTART_BACKOFF_FACTOR, DEFAULT_RESTART_BASE_DELAY_MS,
    MAX_RESTART_DELAY_MS,
};
use crate::domain::PluginState;
use std::time::Duration;
use tracing::{info, warn};

/// Restart decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RestartDecision {
    /// Start a new attempt after the given delay
    Restart(Duration),
    /// Stop supervising the plugin
    Stop,
}

/// Restart policy applied after every attempt
///
/// Determines if a plugin should be started again based on:
/// - The state the attempt settled into
/// - Consecutive failed attempts so far
/// - Backoff factor for exponential delay
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Consecutive failures tolerated (0 = unlimited)
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    /// Start again after a clean exit
    pub restart_on_clean_exit: bool,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            base_delay_ms: DEFAULT_RESTART_BASE_DELAY_MS,
            backoff_factor: DEFAULT_RESTART_BACKOFF_FACTOR,
            restart_on_clean_exit: false,
        }
    }
}

impl RestartPolicy {
    /// Decide what to do after an attempt
    ///
    /// # Arguments
    /// * `identity` - Plugin identity (jitter seed with the failure count, logging)
    /// * `state` - State the attempt settled into
    /// * `consecutive_failures` - Failed attempts in a row, including this one
    ///
    /// Backoff formula:
    /// delay = base_delay * (backoff_factor ^ (failures - 1)) * (1.0 ± 0.1), capped at 60s
    pub fn decide(&self, identity: &str, state: PluginState, consecutive_failures: u32) -> RestartDecision {
        match state {
            PluginState::Pending if self.restart_on_clean_exit => {
                info!(identity = %identity, "Plugin exited cleanly, restarting");
                RestartDecision::Restart(Duration::from_millis(self.base_delay_ms))
            }
            PluginState::Pending => RestartDecision::Stop,
            PluginState::Launching => {
                warn!(identity = %identity, "Attempt did not settle, not restarting");
                RestartDecision::Stop
            }
            PluginState::Restarting => {
                if self.max_attempts > 0 && consecutive_failures >= self.max_attempts {
                    warn!(
                        identity = %identity,
                        failures = %consecutive_failures,
                        max_attempts = %self.max_attempts,
                        "Max restart attempts reached"
                    );
                    return RestartDecision::Stop;
                }

                let delay_ms = self.backoff_delay_ms(identity, consecutive_failures);
                info!(
                    identity = %identity,
                    failures = %consecutive_failures,
                    delay_ms = %delay_ms,
                    "Scheduling plugin restart"
                );
                RestartDecision::Restart(Duration::from_millis(delay_ms))
            }
        }
    }

    fn backoff_delay_ms(&self, identity: &str, consecutive_failures: u32) -> u64 {
        let exponent = consecutive_failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        // ±10% jitter, seeded by identity and failure count: reproducible, but
        // successive restarts of one plugin land on different factors
        let jitter_seed = identity
            .chars()
            .map(|c| c as u32)
            .fold(0u32, u32::wrapping_add)
            .wrapping_add(consecutive_failures.wrapping_mul(13));
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        ((base * jitter_factor) as u64).min(MAX_RESTART_DELAY_MS)
    }
}
