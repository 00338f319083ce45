//! Shared wiring for integration tests: real launcher, real broker

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use plugin_runtime_core::application::{RuntimeDeps, RuntimeSupervisor, SupervisorConfig};
use plugin_runtime_core::port::id_provider::mocks::SequentialIdProvider;
use plugin_runtime_core::port::{LaunchCommand, ProcessRegistry, RegistryError, StdioBroker, StdioStream};
use plugin_runtime_infra_stdio::{ChannelStdioBroker, StdioFrame};
use plugin_runtime_infra_system::{ProcessTable, TokioProcessLauncher, TokioTaskExecutor};

pub const IDENTITY: &str = "acme/integration:1.0.0";

/// ProcessTable that also remembers every PID it was given
#[derive(Default)]
pub struct RecordingRegistry {
    table: ProcessTable,
    seen: Mutex<Vec<u32>>,
}

impl RecordingRegistry {
    pub fn seen(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }
}

impl ProcessRegistry for RecordingRegistry {
    fn add(&self, pid: u32, identity: &str) -> Result<(), RegistryError> {
        self.table.add(pid, identity)?;
        self.seen.lock().unwrap().push(pid);
        Ok(())
    }

    fn remove(&self, pid: u32) -> bool {
        self.table.remove(pid)
    }

    fn contains(&self, pid: u32) -> bool {
        self.table.contains(pid)
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    fn kill_all(&self) -> usize {
        self.table.kill_all()
    }
}

pub struct Runtime {
    pub supervisor: Arc<RuntimeSupervisor>,
    pub registry: Arc<RecordingRegistry>,
    pub broker: Arc<ChannelStdioBroker>,
    pub frames: UnboundedReceiver<StdioFrame>,
}

impl Runtime {
    /// Concatenated (stdout, stderr) of every frame received so far
    pub fn output(&mut self) -> (Vec<u8>, Vec<u8>) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            match frame.stream {
                StdioStream::Stdout => stdout.extend_from_slice(&frame.bytes),
                StdioStream::Stderr => stderr.extend_from_slice(&frame.bytes),
            }
        }
        (stdout, stderr)
    }
}

pub fn config(dir: &Path, command: LaunchCommand) -> SupervisorConfig {
    SupervisorConfig::new(IDENTITY, dir)
        .with_launch(command)
        .with_exit_grace(Duration::from_millis(200))
}

/// Supervisor wired to real adapters
pub fn local_runtime(dir: &Path, command: LaunchCommand) -> Runtime {
    let registry = Arc::new(RecordingRegistry::default());
    let (broker, frames) = ChannelStdioBroker::new(Arc::new(SequentialIdProvider::new("session")));
    let broker = Arc::new(broker);

    let supervisor = Arc::new(RuntimeSupervisor::local(
        config(dir, command),
        RuntimeDeps {
            launcher: Arc::new(TokioProcessLauncher::new()),
            registry: registry.clone(),
            broker: broker.clone(),
            executor: Arc::new(TokioTaskExecutor::new(2)),
        },
    ));

    Runtime {
        supervisor,
        registry,
        broker,
        frames,
    }
}

/// Supervisor with a real launcher and a caller-provided broker
pub fn runtime_with_broker(
    dir: &Path,
    command: LaunchCommand,
    broker: Arc<dyn StdioBroker>,
) -> (Arc<RuntimeSupervisor>, Arc<RecordingRegistry>) {
    let registry = Arc::new(RecordingRegistry::default());
    let supervisor = Arc::new(RuntimeSupervisor::local(
        config(dir, command),
        RuntimeDeps {
            launcher: Arc::new(TokioProcessLauncher::new()),
            registry: registry.clone(),
            broker,
            executor: Arc::new(TokioTaskExecutor::unbounded()),
        },
    ));
    (supervisor, registry)
}

pub fn sh(script: &str) -> LaunchCommand {
    LaunchCommand::new("sh").with_args(["-c", script])
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// True while `pid` names a live, non-zombie process
#[cfg(unix)]
pub fn is_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        // No procfs: kill(0) succeeding is all we know
        Err(_) => !Path::new("/proc/self").exists(),
    }
}
