// Child Process Port
// Abstraction over spawning, waiting on and killing a plugin process

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::ChildEnvironment;

/// Writable end of the child's stdin
pub type StdinWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable end of the child's stdout or stderr
pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// The three standard streams of a spawned child
pub struct ChildStreams {
    pub stdin: StdinWriter,
    pub stdout: OutputReader,
    pub stderr: OutputReader,
}

/// Program and arguments used to launch a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for LaunchCommand {
    /// `bash` with no arguments: the plugin is driven through its stdin
    fn default() -> Self {
        Self::new("bash")
    }
}

/// Full description of a process to spawn
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: LaunchCommand,
    pub working_dir: PathBuf,
    pub env: ChildEnvironment,
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one (unix)
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("get {0} pipe failed")]
    StreamUnavailable(&'static str),

    #[error("Wait failed: {0}")]
    WaitFailed(String),

    #[error("Process kill failed: {0}")]
    Killed(String),
}

/// A spawned child process
///
/// Each stream can be taken once; later calls return `None`.
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process ID (None once the process has been reaped)
    fn pid(&self) -> Option<u32>;

    fn take_stdin(&mut self) -> Option<StdinWriter>;

    fn take_stdout(&mut self) -> Option<OutputReader>;

    fn take_stderr(&mut self) -> Option<OutputReader>;

    /// Wait for the process to exit and reap it
    ///
    /// Calling it again after the process was reaped returns the same status.
    async fn wait(&mut self) -> Result<ProcessExit, ExecutionError>;

    /// Forcibly terminate the process (and its process group where supported)
    ///
    /// No-op if the process has already been reaped.
    async fn kill(&mut self) -> Result<(), ExecutionError>;
}

/// Spawns plugin processes
///
/// Implementations must apply `spec.env` as the complete environment of the
/// child and must arrange for the child to die together with this process.
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Counters shared between a mock launcher and the children it spawns
    #[derive(Debug, Default)]
    pub struct MockProcessStats {
        pub spawned: AtomicUsize,
        pub killed: AtomicUsize,
        pub reaped: AtomicUsize,
    }

    impl MockProcessStats {
        pub fn spawned(&self) -> usize {
            self.spawned.load(Ordering::SeqCst)
        }

        pub fn killed(&self) -> usize {
            self.killed.load(Ordering::SeqCst)
        }

        pub fn reaped(&self) -> usize {
            self.reaped.load(Ordering::SeqCst)
        }
    }

    /// Mock child behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Spawn succeeds; the child prints the given bytes and exits with `code`
        Exit {
            code: i32,
            stdout: Vec<u8>,
            stderr: Vec<u8>,
        },
        /// Spawn succeeds but the child has no stdout pipe
        MissingStdout,
        /// Spawn fails with message
        FailSpawn(String),
    }

    /// Mock launcher producing in-memory children
    pub struct MockProcessLauncher {
        behavior: MockBehavior,
        stats: Arc<MockProcessStats>,
        next_pid: AtomicU32,
        last_spec: Mutex<Option<LaunchSpec>>,
    }

    impl MockProcessLauncher {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                stats: Arc::new(MockProcessStats::default()),
                next_pid: AtomicU32::new(4000),
                last_spec: Mutex::new(None),
            }
        }

        pub fn new_exiting(code: i32) -> Self {
            Self::with_output(code, Vec::new(), Vec::new())
        }

        pub fn with_output(code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
            Self::new(MockBehavior::Exit {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            })
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::FailSpawn(message.into()))
        }

        pub fn stats(&self) -> Arc<MockProcessStats> {
            Arc::clone(&self.stats)
        }

        pub fn last_spec(&self) -> Option<LaunchSpec> {
            self.last_spec.lock().unwrap().clone()
        }
    }

    impl ProcessLauncher for MockProcessLauncher {
        fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>, ExecutionError> {
            *self.last_spec.lock().unwrap() = Some(spec.clone());

            let (code, stdout, stderr) = match &self.behavior {
                MockBehavior::FailSpawn(msg) => {
                    return Err(ExecutionError::SpawnFailed(msg.clone()))
                }
                MockBehavior::MissingStdout => (0, None, Some(Vec::new())),
                MockBehavior::Exit {
                    code,
                    stdout,
                    stderr,
                } => (*code, Some(stdout.clone()), Some(stderr.clone())),
            };

            self.stats.spawned.fetch_add(1, Ordering::SeqCst);
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

            Ok(Box::new(MockChild {
                pid,
                code,
                stdin: Some(Box::new(tokio::io::sink())),
                stdout: stdout.map(|b| Box::new(Cursor::new(b)) as OutputReader),
                stderr: stderr.map(|b| Box::new(Cursor::new(b)) as OutputReader),
                exit: None,
                stats: Arc::clone(&self.stats),
            }))
        }
    }

    struct MockChild {
        pid: u32,
        code: i32,
        stdin: Option<StdinWriter>,
        stdout: Option<OutputReader>,
        stderr: Option<OutputReader>,
        exit: Option<ProcessExit>,
        stats: Arc<MockProcessStats>,
    }

    #[async_trait]
    impl ChildProcess for MockChild {
        fn pid(&self) -> Option<u32> {
            self.exit.is_none().then_some(self.pid)
        }

        fn take_stdin(&mut self) -> Option<StdinWriter> {
            self.stdin.take()
        }

        fn take_stdout(&mut self) -> Option<OutputReader> {
            self.stdout.take()
        }

        fn take_stderr(&mut self) -> Option<OutputReader> {
            self.stderr.take()
        }

        async fn wait(&mut self) -> Result<ProcessExit, ExecutionError> {
            if let Some(exit) = self.exit {
                return Ok(exit);
            }
            let exit = ProcessExit::code(self.code);
            self.exit = Some(exit);
            self.stats.reaped.fetch_add(1, Ordering::SeqCst);
            Ok(exit)
        }

        async fn kill(&mut self) -> Result<(), ExecutionError> {
            self.stats.killed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
