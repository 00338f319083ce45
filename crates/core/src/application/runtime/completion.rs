// Attempt completion signal

use tokio::sync::watch;

/// One-shot "attempt ended" notification, observable by any number of holders
///
/// Carries no outcome: read the runtime state for that.
#[derive(Clone, Debug)]
pub struct CompletionSignal {
    rx: watch::Receiver<bool>,
}

impl CompletionSignal {
    /// Check if the attempt has ended
    pub fn is_done(&self) -> bool {
        // A dropped sender means the attempt is gone without closing (panic)
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until the attempt has ended
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|done| *done).await;
    }
}

/// Closing side of a completion signal, owned by the attempt
#[derive(Debug)]
pub struct CompletionSender {
    tx: watch::Sender<bool>,
}

impl CompletionSender {
    /// Permanently close the signal, waking every holder
    ///
    /// Consumes the sender so a signal can only be closed once.
    pub fn close(self) {
        self.tx.send_replace(true);
    }
}

/// Create a completion channel for a new attempt
pub fn completion_channel() -> (CompletionSender, CompletionSignal) {
    let (tx, rx) = watch::channel(false);
    (CompletionSender { tx }, CompletionSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_close_wakes_every_holder() {
        let (sender, signal) = completion_channel();
        let mut first = signal.clone();
        let mut second = signal.clone();
        let mut first_wait = task::spawn(first.wait());
        let mut second_wait = task::spawn(second.wait());

        assert_pending!(first_wait.poll());
        assert_pending!(second_wait.poll());
        assert!(!signal.is_done());

        sender.close();

        assert!(first_wait.is_woken());
        assert!(second_wait.is_woken());
        assert_ready!(first_wait.poll());
        assert_ready!(second_wait.poll());
        assert!(signal.is_done());
    }

    #[tokio::test]
    async fn test_holder_obtained_after_close_is_done() {
        let (sender, signal) = completion_channel();
        sender.close();

        let mut late = signal.clone();
        assert!(late.is_done());
        tokio::time::timeout(Duration::from_millis(100), late.wait())
            .await
            .expect("closed signal must not block");
    }

    #[tokio::test]
    async fn test_dropped_sender_releases_waiters() {
        let (sender, mut signal) = completion_channel();
        drop(sender);

        assert!(signal.is_done());
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("dropped sender must not block");
    }
}
