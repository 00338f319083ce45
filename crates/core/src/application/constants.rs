// Runtime constants (no magic values)
use std::time::Duration;

/// Time a plugin gets to exit on its own once relaying ended, before it is killed (2s)
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Default restart base delay (1000ms = 1s)
pub const DEFAULT_RESTART_BASE_DELAY_MS: u64 = 1000;

/// Upper bound for a single restart delay (60s)
pub const MAX_RESTART_DELAY_MS: u64 = 60_000;

/// Default exponential backoff factor between consecutive failed attempts
pub const DEFAULT_RESTART_BACKOFF_FACTOR: f64 = 2.0;

/// Default consecutive failed attempts before the keeper gives up (0 = never)
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 5;

/// Task names used when submitting relay loops
pub const STDOUT_RELAY_TASK: &str = "plugin-stdout-relay";
pub const STDERR_RELAY_TASK: &str = "plugin-stderr-relay";

/// Interval between process registry sweeps while the daemon shuts down (100ms)
pub const SHUTDOWN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
