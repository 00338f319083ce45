// Channel stdio broker
// Publishes plugin output as frames on an mpsc channel and routes stdin writes
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use plugin_runtime_core::port::process::{ChildStreams, OutputReader, StdinWriter};
use plugin_runtime_core::port::stdio_broker::{
    RelayError, StdioBroker, StdioSession, StdioStream,
};
use plugin_runtime_core::port::IdProvider;

use crate::frame::StdioFrame;
use crate::DEFAULT_READ_BUFFER_SIZE;

/// Relay progress of one session
#[derive(Debug, Default)]
struct RelayProgress {
    finished: u8,
    error: Option<RelayError>,
}

/// Stdio broker backed by an unbounded mpsc channel
///
/// Output frames of every registered session go to the single receiver
/// returned by `new`. Sessions stay addressable by ID until removed.
pub struct ChannelStdioBroker {
    sessions: Mutex<HashMap<String, Arc<ChannelSession>>>,
    frames: mpsc::UnboundedSender<StdioFrame>,
    ids: Arc<dyn IdProvider>,
    buffer_size: usize,
}

impl ChannelStdioBroker {
    /// Create a broker and the receiving end of its frame transport
    pub fn new(ids: Arc<dyn IdProvider>) -> (Self, mpsc::UnboundedReceiver<StdioFrame>) {
        let (frames, rx) = mpsc::unbounded_channel();
        let broker = Self {
            sessions: Mutex::new(HashMap::new()),
            frames,
            ids,
            buffer_size: DEFAULT_READ_BUFFER_SIZE,
        };
        (broker, rx)
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<ChannelSession>> {
        self.sessions().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forward bytes to the stdin of a registered plugin
    ///
    /// # Errors
    /// - RelayError::SessionNotFound if the session is unknown or removed
    /// - RelayError::StdinClosed / RelayError::Stdin from the session
    pub async fn write(&self, session_id: &str, data: &[u8]) -> Result<(), RelayError> {
        let session = self
            .session(session_id)
            .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))?;
        session.write_stdin(data).await
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<ChannelSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StdioBroker for ChannelStdioBroker {
    fn register(&self, identity: &str, streams: ChildStreams) -> Arc<dyn StdioSession> {
        let session = Arc::new(ChannelSession::new(
            self.ids.generate_id(),
            identity.to_string(),
            streams,
            self.frames.clone(),
            self.buffer_size,
        ));
        debug!(session_id = %session.id, identity = %identity, "Stdio session registered");

        self.sessions()
            .insert(session.id.clone(), Arc::clone(&session));
        session
    }

    fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions().remove(session_id);
        match removed {
            Some(session) => {
                session.stop();
                debug!(session_id = %session_id, "Stdio session removed");
                true
            }
            None => false,
        }
    }
}

/// One plugin's registered streams
pub struct ChannelSession {
    id: String,
    identity: String,
    stdin: AsyncMutex<Option<StdinWriter>>,
    stdout: Mutex<Option<OutputReader>>,
    stderr: Mutex<Option<OutputReader>>,
    frames: mpsc::UnboundedSender<StdioFrame>,
    progress: watch::Sender<RelayProgress>,
    stopped: watch::Sender<bool>,
    transport_closed: AtomicBool,
    buffer_size: usize,
}

impl ChannelSession {
    fn new(
        id: String,
        identity: String,
        streams: ChildStreams,
        frames: mpsc::UnboundedSender<StdioFrame>,
        buffer_size: usize,
    ) -> Self {
        let (progress, _) = watch::channel(RelayProgress::default());
        let (stopped, _) = watch::channel(false);
        Self {
            id,
            identity,
            stdin: AsyncMutex::new(Some(streams.stdin)),
            stdout: Mutex::new(Some(streams.stdout)),
            stderr: Mutex::new(Some(streams.stderr)),
            frames,
            progress,
            stopped,
            transport_closed: AtomicBool::new(false),
            buffer_size,
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Close the plugin's stdin, signalling EOF to it
    pub async fn close_stdin(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
    }

    fn take_reader(&self, stream: StdioStream) -> Option<OutputReader> {
        let slot = match stream {
            StdioStream::Stdout => &self.stdout,
            StdioStream::Stderr => &self.stderr,
        };
        slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Copy one stream onto the transport until EOF, an I/O error or stop
    async fn relay(&self, stream: StdioStream) {
        // A second relay call for the same stream has nothing left to read
        let Some(mut reader) = self.take_reader(stream) else {
            return;
        };

        let mut stopped = self.stopped.subscribe();
        let mut buf = vec![0u8; self.buffer_size];
        let mut error = None;

        loop {
            let read = tokio::select! {
                biased;
                _ = stopped.wait_for(|stopped| *stopped) => break,
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => break,
                Ok(n) => self.publish(stream, &buf[..n]),
                Err(e) => {
                    warn!(
                        session_id = %self.id,
                        identity = %self.identity,
                        stream = %stream,
                        error = %e,
                        "Stdio relay failed"
                    );
                    error = Some(RelayError::Io {
                        stream,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        self.progress.send_modify(|progress| {
            progress.finished += 1;
            if progress.error.is_none() {
                progress.error = error;
            }
        });
    }

    fn publish(&self, stream: StdioStream, bytes: &[u8]) {
        let frame = StdioFrame {
            session_id: self.id.clone(),
            identity: self.identity.clone(),
            stream,
            bytes: bytes.to_vec(),
        };

        // Keep draining without a receiver so the plugin never blocks on a full pipe
        if self.frames.send(frame).is_err() && !self.transport_closed.swap(true, Ordering::SeqCst) {
            warn!(session_id = %self.id, "Stdio transport closed, discarding plugin output");
        }
    }
}

#[async_trait]
impl StdioSession for ChannelSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn relay_stdout(&self) {
        self.relay(StdioStream::Stdout).await
    }

    async fn relay_stderr(&self) {
        self.relay(StdioStream::Stderr).await
    }

    async fn wait(&self) -> Result<(), RelayError> {
        let mut progress = self.progress.subscribe();
        let mut stopped = self.stopped.subscribe();

        tokio::select! {
            _ = progress.wait_for(|progress| progress.finished >= 2) => {},
            _ = stopped.wait_for(|stopped| *stopped) => {},
        }

        let error = self.progress.borrow().error.clone();
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn write_stdin(&self, data: &[u8]) -> Result<(), RelayError> {
        let mut guard = self.stdin.lock().await;
        if self.is_stopped() {
            guard.take();
            return Err(RelayError::StdinClosed);
        }

        let stdin = guard.as_mut().ok_or(RelayError::StdinClosed)?;
        stdin
            .write_all(data)
            .await
            .map_err(|e| RelayError::Stdin(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| RelayError::Stdin(e.to_string()))
    }

    fn stop(&self) {
        self.stopped.send_replace(true);
        // A writer holding the lock drops stdin itself on its next write
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use plugin_runtime_core::port::id_provider::mocks::SequentialIdProvider;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncRead, DuplexStream, ReadBuf};

    /// Reader failing on first use
    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke")))
        }
    }

    /// Plugin side of the duplex pipes handed to the broker
    struct PluginEnds {
        stdin: DuplexStream,
        stdout: DuplexStream,
        stderr: DuplexStream,
    }

    fn streams() -> (ChildStreams, PluginEnds) {
        let (stdin_broker, stdin_plugin) = duplex(64);
        let (stdout_plugin, stdout_broker) = duplex(64);
        let (stderr_plugin, stderr_broker) = duplex(64);
        (
            ChildStreams {
                stdin: Box::new(stdin_broker),
                stdout: Box::new(stdout_broker),
                stderr: Box::new(stderr_broker),
            },
            PluginEnds {
                stdin: stdin_plugin,
                stdout: stdout_plugin,
                stderr: stderr_plugin,
            },
        )
    }

    fn broker() -> (ChannelStdioBroker, mpsc::UnboundedReceiver<StdioFrame>) {
        ChannelStdioBroker::new(Arc::new(SequentialIdProvider::new("session")))
    }

    fn spawn_relays(session: &Arc<dyn StdioSession>) {
        let out = Arc::clone(session);
        tokio::spawn(async move { out.relay_stdout().await });
        let err = Arc::clone(session);
        tokio::spawn(async move { err.relay_stderr().await });
    }

    /// Concatenated (stdout, stderr) bytes of every queued frame
    fn collect(rx: &mut mpsc::UnboundedReceiver<StdioFrame>) -> (Vec<u8>, Vec<u8>) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            match frame.stream {
                StdioStream::Stdout => stdout.extend_from_slice(&frame.bytes),
                StdioStream::Stderr => stderr.extend_from_slice(&frame.bytes),
            }
        }
        (stdout, stderr)
    }

    #[tokio::test]
    async fn test_relays_both_streams_until_eof() {
        let (broker, mut rx) = broker();
        let (child_streams, mut plugin) = streams();

        let session = broker.register("acme/echo:1.0.0", child_streams);
        assert_eq!(session.id(), "session-1");
        assert_eq!(session.identity(), "acme/echo:1.0.0");
        spawn_relays(&session);

        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        plugin.stdout.write_all(&payload).await.unwrap();
        plugin.stderr.write_all(b"warn: \xff raw").await.unwrap();
        drop(plugin.stdout);
        drop(plugin.stderr);

        tokio::time::timeout(Duration::from_secs(1), session.wait())
            .await
            .expect("relays should finish at EOF")
            .unwrap();

        let (stdout, stderr) = collect(&mut rx);
        assert_eq!(stdout, payload);
        assert_eq!(stderr, b"warn: \xff raw".to_vec());
    }

    #[tokio::test]
    async fn test_frames_carry_session_metadata() {
        let (broker, mut rx) = broker();
        let (child_streams, mut plugin) = streams();

        let session = broker.register("acme/echo:1.0.0", child_streams);
        spawn_relays(&session);

        plugin.stderr.write_all(b"boom").await.unwrap();
        drop(plugin.stdout);
        drop(plugin.stderr);
        assert_ok!(session.wait().await);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.session_id, "session-1");
        assert_eq!(frame.identity, "acme/echo:1.0.0");
        assert_eq!(frame.stream, StdioStream::Stderr);
        assert_eq!(frame.text(), "boom");
    }

    #[tokio::test]
    async fn test_read_error_is_reported_after_both_relays_end() {
        let (broker, _rx) = broker();
        let (stdin_broker, _stdin_plugin) = duplex(64);
        let (stdout_plugin, stdout_broker) = duplex(64);

        let session = broker.register(
            "acme/echo:1.0.0",
            ChildStreams {
                stdin: Box::new(stdin_broker),
                stdout: Box::new(stdout_broker),
                stderr: Box::new(FailingReader),
            },
        );
        spawn_relays(&session);
        drop(stdout_plugin);

        let result = tokio::time::timeout(Duration::from_secs(1), session.wait())
            .await
            .expect("wait should return");
        assert_eq!(
            result,
            Err(RelayError::Io {
                stream: StdioStream::Stderr,
                message: "pipe broke".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_stop_ends_relays_on_open_pipes() {
        let (broker, _rx) = broker();
        let (child_streams, plugin) = streams();

        let session = broker.register("acme/echo:1.0.0", child_streams);
        spawn_relays(&session);

        session.stop();

        tokio::time::timeout(Duration::from_secs(1), session.wait())
            .await
            .expect("stop should release wait")
            .unwrap();
        assert_eq!(
            session.write_stdin(b"late").await,
            Err(RelayError::StdinClosed)
        );
        drop(plugin);
    }

    #[tokio::test]
    async fn test_write_routes_to_plugin_stdin() {
        let (broker, _rx) = broker();
        let (child_streams, mut plugin) = streams();

        let session = broker.register("acme/echo:1.0.0", child_streams);
        assert_ok!(broker.write(session.id(), b"hello").await);

        let mut buf = [0u8; 5];
        plugin.stdin.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        let channel_session = broker.session(session.id()).unwrap();
        channel_session.close_stdin().await;
        assert_eq!(
            broker.write(session.id(), b"more").await,
            Err(RelayError::StdinClosed)
        );
    }

    #[tokio::test]
    async fn test_remove_forgets_session() {
        let (broker, _rx) = broker();
        let (child_streams, _plugin) = streams();

        let session = broker.register("acme/echo:1.0.0", child_streams);
        let id = session.id().to_string();
        assert!(broker.contains(&id));
        assert_eq!(broker.len(), 1);

        assert!(broker.remove(&id));
        assert!(!broker.remove(&id));
        assert!(broker.is_empty());
        assert_eq!(
            broker.write(&id, b"x").await,
            Err(RelayError::SessionNotFound(id.clone()))
        );
    }

    #[tokio::test]
    async fn test_output_drained_without_receiver() {
        let (broker, rx) = broker();
        drop(rx);
        let (child_streams, mut plugin) = streams();

        let session = broker.register("acme/echo:1.0.0", child_streams);
        spawn_relays(&session);

        // Larger than the duplex buffer: blocks unless the relay keeps reading
        let payload = vec![b'x'; 4096];
        tokio::time::timeout(Duration::from_secs(1), plugin.stdout.write_all(&payload))
            .await
            .expect("writer should not block")
            .unwrap();
        drop(plugin.stdout);
        drop(plugin.stderr);

        assert_ok!(session.wait().await);
    }
}
