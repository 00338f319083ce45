// Keeper shutdown: token observed between attempts, sender that ends the running one

use crate::port::ProcessRegistry;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Shutdown signal observed by the keeper between attempts
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the sender is dropped
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|requested| *requested).await;
    }
}

/// Requests keeper shutdown
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Flag shutdown for every token; a running attempt is left alone
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Flag shutdown, then kill registered plugin processes every `sweep`
    /// until `keeper` finishes
    ///
    /// A single `kill_all` misses a child that is spawned but not yet
    /// registered when shutdown arrives; the attempt would then never end.
    /// Repeating the sweep catches it as soon as it is registered.
    ///
    /// # Errors
    /// Returns the join error if the keeper task panicked or was aborted.
    pub async fn shutdown_and_sweep<T>(
        &self,
        keeper: &mut JoinHandle<T>,
        registry: &dyn ProcessRegistry,
        sweep: Duration,
    ) -> Result<T, JoinError> {
        self.shutdown();

        let mut ticker = interval(sweep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                joined = &mut *keeper => return joined,
                _ = ticker.tick() => {
                    let killed = registry.kill_all();
                    if killed > 0 {
                        info!(killed = %killed, "Plugin processes killed");
                    }
                }
            }
        }
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
