// Stdio Broker Port
// Relays raw plugin stdio bytes to and from the daemon's internal transport

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::port::process::ChildStreams;

/// Output stream of a plugin process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StdioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StdioStream::Stdout => write!(f, "stdout"),
            StdioStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Relay errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("{stream} relay failed: {message}")]
    Io {
        stream: StdioStream,
        message: String,
    },

    #[error("stdin write failed: {0}")]
    Stdin(String),

    #[error("stdin is closed")]
    StdinClosed,

    #[error("stdio session not found: {0}")]
    SessionNotFound(String),
}

/// One registered set of plugin streams
#[async_trait]
pub trait StdioSession: Send + Sync {
    /// Session ID handed out at registration
    fn id(&self) -> &str;

    /// Plugin identity the streams were registered under
    fn identity(&self) -> &str;

    /// Relay stdout until EOF, an I/O error or `stop`
    async fn relay_stdout(&self);

    /// Relay stderr until EOF, an I/O error or `stop`
    async fn relay_stderr(&self);

    /// Block until both relay directions have terminated
    ///
    /// # Errors
    /// The first I/O error hit by either relay direction
    async fn wait(&self) -> Result<(), RelayError>;

    /// Forward bytes to the plugin's stdin
    async fn write_stdin(&self, data: &[u8]) -> Result<(), RelayError>;

    /// Abort relaying and close stdin
    fn stop(&self);
}

/// Stdio broker trait
///
/// Implementations:
/// - ChannelStdioBroker: publishes output frames on an mpsc transport
pub trait StdioBroker: Send + Sync {
    /// Register the streams of a freshly spawned plugin
    fn register(&self, identity: &str, streams: ChildStreams) -> Arc<dyn StdioSession>;

    /// Release a registration (returns false if the session was unknown)
    fn remove(&self, session_id: &str) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::port::process::{OutputReader, StdinWriter};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::sync::{watch, Notify};

    /// Mock broker behavior
    #[derive(Debug, Clone)]
    pub enum MockRelayBehavior {
        /// Relays drain the streams, wait succeeds once both are done
        Drain,
        /// wait fails immediately with the given message
        FailWait(String),
        /// wait blocks until the notify fires, then behaves like Drain
        Hold(Arc<Notify>),
    }

    /// Bytes captured by every session of a mock broker
    #[derive(Debug, Default, Clone)]
    pub struct Captured {
        pub stdout: Vec<u8>,
        pub stderr: Vec<u8>,
    }

    /// Mock broker keeping streams in memory
    pub struct MockStdioBroker {
        behavior: MockRelayBehavior,
        live: Mutex<HashSet<String>>,
        registered: AtomicUsize,
        removed: AtomicUsize,
        captured: Arc<Mutex<Captured>>,
    }

    impl MockStdioBroker {
        pub fn new(behavior: MockRelayBehavior) -> Self {
            Self {
                behavior,
                live: Mutex::new(HashSet::new()),
                registered: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
                captured: Arc::new(Mutex::new(Captured::default())),
            }
        }

        pub fn new_draining() -> Self {
            Self::new(MockRelayBehavior::Drain)
        }

        pub fn new_failing(message: impl Into<String>) -> Self {
            Self::new(MockRelayBehavior::FailWait(message.into()))
        }

        pub fn registered(&self) -> usize {
            self.registered.load(Ordering::SeqCst)
        }

        pub fn removed(&self) -> usize {
            self.removed.load(Ordering::SeqCst)
        }

        pub fn live_sessions(&self) -> usize {
            self.live.lock().unwrap().len()
        }

        pub fn captured(&self) -> Captured {
            self.captured.lock().unwrap().clone()
        }
    }

    impl StdioBroker for MockStdioBroker {
        fn register(&self, identity: &str, streams: ChildStreams) -> Arc<dyn StdioSession> {
            let n = self.registered.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("mock-session-{}", n);
            self.live.lock().unwrap().insert(id.clone());

            let (done_tx, _) = watch::channel(0usize);
            Arc::new(MockSession {
                id,
                identity: identity.to_string(),
                behavior: self.behavior.clone(),
                stdin: Mutex::new(Some(streams.stdin)),
                stdout: Mutex::new(Some(streams.stdout)),
                stderr: Mutex::new(Some(streams.stderr)),
                relays_done: done_tx,
                captured: Arc::clone(&self.captured),
            })
        }

        fn remove(&self, session_id: &str) -> bool {
            let removed = self.live.lock().unwrap().remove(session_id);
            if removed {
                self.removed.fetch_add(1, Ordering::SeqCst);
            }
            removed
        }
    }

    struct MockSession {
        id: String,
        identity: String,
        behavior: MockRelayBehavior,
        stdin: Mutex<Option<StdinWriter>>,
        stdout: Mutex<Option<OutputReader>>,
        stderr: Mutex<Option<OutputReader>>,
        relays_done: watch::Sender<usize>,
        captured: Arc<Mutex<Captured>>,
    }

    impl MockSession {
        async fn drain(&self, stream: StdioStream) {
            let slot = match stream {
                StdioStream::Stdout => &self.stdout,
                StdioStream::Stderr => &self.stderr,
            };
            let reader = slot.lock().unwrap().take();
            if let Some(mut reader) = reader {
                let mut buf = Vec::new();
                let _ = reader.read_to_end(&mut buf).await;
                let mut captured = self.captured.lock().unwrap();
                match stream {
                    StdioStream::Stdout => captured.stdout.extend_from_slice(&buf),
                    StdioStream::Stderr => captured.stderr.extend_from_slice(&buf),
                }
            }
            self.relays_done.send_modify(|n| *n += 1);
        }

        async fn wait_drained(&self) {
            let mut rx = self.relays_done.subscribe();
            let _ = rx.wait_for(|n| *n >= 2).await;
        }
    }

    #[async_trait]
    impl StdioSession for MockSession {
        fn id(&self) -> &str {
            &self.id
        }

        fn identity(&self) -> &str {
            &self.identity
        }

        async fn relay_stdout(&self) {
            self.drain(StdioStream::Stdout).await
        }

        async fn relay_stderr(&self) {
            self.drain(StdioStream::Stderr).await
        }

        async fn wait(&self) -> Result<(), RelayError> {
            match &self.behavior {
                MockRelayBehavior::Drain => {
                    self.wait_drained().await;
                    Ok(())
                }
                MockRelayBehavior::FailWait(msg) => Err(RelayError::Io {
                    stream: StdioStream::Stdout,
                    message: msg.clone(),
                }),
                MockRelayBehavior::Hold(notify) => {
                    notify.notified().await;
                    self.wait_drained().await;
                    Ok(())
                }
            }
        }

        async fn write_stdin(&self, _data: &[u8]) -> Result<(), RelayError> {
            if self.stdin.lock().unwrap().is_some() {
                Ok(())
            } else {
                Err(RelayError::StdinClosed)
            }
        }

        fn stop(&self) {
            self.stdin.lock().unwrap().take();
        }
    }
}
