// Runtime supervisor - spawn/teardown sequencing for one local plugin process

use async_trait::async_trait;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::completion::{completion_channel, CompletionSender, CompletionSignal};
use super::PluginRuntime;
use crate::application::constants::{DEFAULT_EXIT_GRACE, STDERR_RELAY_TASK, STDOUT_RELAY_TASK};
use crate::domain::{ChildEnvironment, PluginState, RuntimeType};
use crate::error::{Result, RuntimeError};
use crate::port::{
    ChildProcess, ChildStreams, ExecutionError, LaunchCommand, LaunchSpec, ProcessLauncher,
    ProcessRegistry, StdioBroker, StdioSession, TaskExecutor,
};

/// Supervisor configuration, fixed at construction
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Plugin identity, used as the broker registration key and in logs
    pub identity: String,
    /// Plugin installation path, used as the child's working directory
    pub working_dir: PathBuf,
    pub launch: LaunchCommand,
    /// How long the child may take to exit on its own before it is killed
    pub exit_grace: Duration,
}

impl SupervisorConfig {
    pub fn new(identity: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            identity: identity.into(),
            working_dir: working_dir.into(),
            launch: LaunchCommand::default(),
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }

    pub fn with_launch(mut self, launch: LaunchCommand) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_exit_grace(mut self, exit_grace: Duration) -> Self {
        self.exit_grace = exit_grace;
        self
    }
}

/// External collaborators of the supervisor
#[derive(Clone)]
pub struct RuntimeDeps {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub registry: Arc<dyn ProcessRegistry>,
    pub broker: Arc<dyn StdioBroker>,
    pub executor: Arc<dyn TaskExecutor>,
}

/// Supervises one locally installed plugin, one attempt at a time
///
/// An attempt spawns the plugin, hands its streams to the stdio broker, relays
/// stdout and stderr concurrently until both close, then reaps the process.
/// Every resource taken during an attempt is released before `start` returns,
/// on every path.
pub struct RuntimeSupervisor {
    config: SupervisorConfig,
    environment: ChildEnvironment,
    deps: RuntimeDeps,
    state: Mutex<PluginState>,
    stdio_handle: Mutex<Option<String>>,
    completion: Mutex<Option<CompletionSignal>>,
    in_flight: AtomicBool,
}

/// Resources acquired by one attempt, released by `teardown` in reverse order
#[derive(Default)]
struct Attempt {
    completion: Option<CompletionSender>,
    child: Option<Box<dyn ChildProcess>>,
    registered_pid: Option<u32>,
    session: Option<Arc<dyn StdioSession>>,
    relays: Vec<JoinHandle<()>>,
}

/// Clears the in-flight flag when an attempt ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RuntimeSupervisor {
    /// Create a supervisor with an explicit child environment
    pub fn new(config: SupervisorConfig, environment: ChildEnvironment, deps: RuntimeDeps) -> Self {
        Self {
            config,
            environment,
            deps,
            state: Mutex::new(PluginState::Pending),
            stdio_handle: Mutex::new(None),
            completion: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Create a supervisor whose child sees only `INSTALL_METHOD=local` and
    /// this process's `PATH`
    pub fn local(config: SupervisorConfig, deps: RuntimeDeps) -> Self {
        Self::new(config, ChildEnvironment::local_from_process(), deps)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn environment(&self) -> &ChildEnvironment {
        &self.environment
    }

    /// Broker session ID, set only while the plugin's streams are registered
    pub fn stdio_handle(&self) -> Option<String> {
        lock(&self.stdio_handle).clone()
    }

    fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.config.launch.clone(),
            working_dir: self.config.working_dir.clone(),
            env: self.environment.clone(),
        }
    }

    fn set_state(&self, next: PluginState) {
        let mut state = lock(&self.state);
        match state.transition(next) {
            Ok(next) => {
                if *state != next {
                    debug!(
                        identity = %self.config.identity,
                        from = %*state,
                        to = %next,
                        "Plugin state changed"
                    );
                }
                *state = next;
            }
            Err(e) => error!(identity = %self.config.identity, error = %e, "Rejected plugin state change"),
        }
    }

    fn setup_failed(&self, err: impl Into<RuntimeError>) -> RuntimeError {
        self.set_state(PluginState::Restarting);
        err.into()
    }

    fn take_streams(child: &mut dyn ChildProcess) -> std::result::Result<ChildStreams, ExecutionError> {
        let stdin = child
            .take_stdin()
            .ok_or(ExecutionError::StreamUnavailable("stdin"))?;
        let stdout = child
            .take_stdout()
            .ok_or(ExecutionError::StreamUnavailable("stdout"))?;
        let stderr = child
            .take_stderr()
            .ok_or(ExecutionError::StreamUnavailable("stderr"))?;

        Ok(ChildStreams {
            stdin,
            stdout,
            stderr,
        })
    }

    /// Attempt body; everything it acquires is recorded in `attempt`
    async fn run_attempt(&self, attempt: &mut Attempt) -> Result<()> {
        let (sender, signal) = completion_channel();
        *lock(&self.completion) = Some(signal);
        attempt.completion = Some(sender);
        self.set_state(PluginState::Launching);

        let spec = self.launch_spec();
        let mut child = self
            .deps
            .launcher
            .spawn(&spec)
            .map_err(|e| self.setup_failed(e))?;

        // The child is recorded before stream acquisition so a missing pipe
        // still gets it killed and reaped
        let streams = Self::take_streams(child.as_mut());
        let pid = child.pid();
        attempt.child = Some(child);
        let streams = streams.map_err(|e| self.setup_failed(e))?;

        if let Some(pid) = pid {
            self.deps
                .registry
                .add(pid, &self.config.identity)
                .map_err(|e| self.setup_failed(e))?;
            attempt.registered_pid = Some(pid);
        }

        info!(identity = %self.config.identity, pid = ?pid, "Plugin started");

        let session = self.deps.broker.register(&self.config.identity, streams);
        *lock(&self.stdio_handle) = Some(session.id().to_string());
        attempt.session = Some(Arc::clone(&session));

        let stdout = Arc::clone(&session);
        attempt.relays.push(self.deps.executor.submit(
            STDOUT_RELAY_TASK,
            Box::pin(async move { stdout.relay_stdout().await }),
        ));
        let stderr = Arc::clone(&session);
        attempt.relays.push(self.deps.executor.submit(
            STDERR_RELAY_TASK,
            Box::pin(async move { stderr.relay_stderr().await }),
        ));

        if let Err(e) = session.wait().await {
            self.set_state(PluginState::Restarting);
            warn!(identity = %self.config.identity, error = %e, "Plugin stdio relay failed");
            return Err(e.into());
        }

        for joined in join_all(attempt.relays.drain(..)).await {
            if let Err(e) = joined {
                warn!(identity = %self.config.identity, error = %e, "Stdio relay task ended abnormally");
            }
        }

        self.set_state(PluginState::Pending);
        Ok(())
    }

    /// Release everything the attempt acquired, newest first
    async fn teardown(&self, mut attempt: Attempt) {
        if let Some(session) = &attempt.session {
            session.stop();
        }
        for relay in attempt.relays.drain(..) {
            relay.abort();
        }

        if let Some(mut child) = attempt.child.take() {
            self.reap(child.as_mut()).await;
        }

        if let Some(pid) = attempt.registered_pid.take() {
            self.deps.registry.remove(pid);
        }

        if let Some(session) = attempt.session.take() {
            self.deps.broker.remove(session.id());
        }
        lock(&self.stdio_handle).take();

        if let Some(completion) = attempt.completion.take() {
            completion.close();
        }
    }

    /// Wait for the child (bounded by the exit grace), kill it, reconcile state
    async fn reap(&self, child: &mut dyn ChildProcess) {
        let exited = match tokio::time::timeout(self.config.exit_grace, child.wait()).await {
            Ok(result) => Some(result),
            Err(_) => {
                debug!(
                    identity = %self.config.identity,
                    grace_ms = %self.config.exit_grace.as_millis(),
                    "Plugin still running after exit grace"
                );
                None
            }
        };

        // Always issued; a no-op for an already reaped child
        if let Err(e) = child.kill().await {
            warn!(identity = %self.config.identity, error = %e, "Failed to kill plugin process");
        }

        let exit = match exited {
            Some(result) => result,
            None => child.wait().await,
        };

        match exit {
            Ok(status) if status.success() => {
                debug!(identity = %self.config.identity, status = %status, "Plugin process exited");
            }
            Ok(status) => {
                self.set_state(PluginState::Restarting);
                error!(identity = %self.config.identity, status = %status, "Plugin exited with error");
            }
            Err(e) => {
                self.set_state(PluginState::Restarting);
                error!(identity = %self.config.identity, error = %e, "Plugin exited with error");
            }
        }
    }
}

#[async_trait]
impl PluginRuntime for RuntimeSupervisor {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Local
    }

    fn identity(&self) -> &str {
        &self.config.identity
    }

    fn state(&self) -> PluginState {
        *lock(&self.state)
    }

    /// Run one attempt
    ///
    /// The future must be driven to completion: cleanup runs at its end.
    async fn start(&self) -> Result<()> {
        let _guard = InFlightGuard::acquire(&self.in_flight)
            .ok_or_else(|| RuntimeError::AttemptInProgress(self.config.identity.clone()))?;

        let started = Instant::now();
        let mut attempt = Attempt::default();
        let result = self.run_attempt(&mut attempt).await;
        self.teardown(attempt).await;

        info!(
            identity = %self.config.identity,
            state = %self.state(),
            elapsed_ms = %started.elapsed().as_millis(),
            "Plugin stopped"
        );

        result
    }

    fn wait(&self) -> Result<CompletionSignal> {
        lock(&self.completion).clone().ok_or(RuntimeError::NotStarted)
    }
}
