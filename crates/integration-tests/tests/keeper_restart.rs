//! Keeper restarts with real child processes

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{local_runtime, sh, wait_until};
use plugin_runtime_core::application::{
    shutdown_channel, CompletionSignal, PluginKeeper, PluginRuntime, RestartPolicy,
};
use plugin_runtime_core::domain::{PluginState, RuntimeType};
use plugin_runtime_core::port::{LaunchCommand, ProcessRegistry};
use tokio::sync::Notify;

/// Holds `start` until released, so a test can act before the child exists
struct GatedRuntime {
    inner: Arc<dyn PluginRuntime>,
    entered: AtomicBool,
    gate: Notify,
}

#[async_trait]
impl PluginRuntime for GatedRuntime {
    fn runtime_type(&self) -> RuntimeType {
        self.inner.runtime_type()
    }

    fn identity(&self) -> &str {
        self.inner.identity()
    }

    fn state(&self) -> PluginState {
        self.inner.state()
    }

    async fn start(&self) -> plugin_runtime_core::Result<()> {
        self.entered.store(true, Ordering::SeqCst);
        self.gate.notified().await;
        self.inner.start().await
    }

    fn wait(&self) -> plugin_runtime_core::Result<CompletionSignal> {
        self.inner.wait()
    }
}

fn policy(max_attempts: u32) -> RestartPolicy {
    RestartPolicy {
        max_attempts,
        base_delay_ms: 10,
        backoff_factor: 1.0,
        restart_on_clean_exit: false,
    }
}

#[tokio::test]
async fn test_failing_plugin_restarted_until_cap() {
    let dir = tempfile::tempdir().unwrap();
    let mut rt = local_runtime(dir.path(), sh("echo attempt; exit 1"));
    let keeper = PluginKeeper::new(rt.supervisor.clone(), policy(3));
    let (_tx, rx) = shutdown_channel();

    let report = tokio::time::timeout(Duration::from_secs(10), keeper.run(rx))
        .await
        .expect("keeper should give up")
        .unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(report.consecutive_failures, 3);
    assert_eq!(report.last_state, PluginState::Restarting);
    assert_eq!(rt.registry.seen().len(), 3);
    assert_eq!(rt.output().0, b"attempt\nattempt\nattempt\n");
}

#[tokio::test]
async fn test_clean_exit_is_not_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let rt = local_runtime(dir.path(), sh("exit 0"));
    let keeper = PluginKeeper::new(rt.supervisor.clone(), policy(3));
    let (_tx, rx) = shutdown_channel();

    let report = keeper.run(rx).await.unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(report.last_state, PluginState::Pending);
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_with_kill_all_stops_keeper() {
    let dir = tempfile::tempdir().unwrap();
    let rt = local_runtime(dir.path(), LaunchCommand::new("sleep").with_args(["30"]));
    let keeper = PluginKeeper::new(rt.supervisor.clone(), policy(0));
    let (tx, rx) = shutdown_channel();

    let run = tokio::spawn(async move { keeper.run(rx).await });
    wait_until(|| !rt.registry.is_empty()).await;

    tx.shutdown();
    rt.registry.kill_all();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("keeper should stop after its attempt ends")
        .unwrap()
        .unwrap();
    assert_eq!(report.attempts, 1);
    assert!(rt.registry.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_during_launch_kills_late_registered_child() {
    let dir = tempfile::tempdir().unwrap();
    // cat keeps running while its stdin is open
    let rt = local_runtime(dir.path(), LaunchCommand::new("cat"));
    let gated = Arc::new(GatedRuntime {
        inner: rt.supervisor.clone(),
        entered: AtomicBool::new(false),
        gate: Notify::new(),
    });
    let keeper = PluginKeeper::new(gated.clone(), policy(0));
    let (tx, rx) = shutdown_channel();

    let mut run = tokio::spawn(async move { keeper.run(rx).await });
    wait_until(|| gated.entered.load(Ordering::SeqCst)).await;

    let registry = rt.registry.clone();
    let stopping = tokio::spawn(async move {
        tx.shutdown_and_sweep(&mut run, &*registry, Duration::from_millis(20))
            .await
    });

    // First sweep has run against an empty registry; now let the child spawn
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rt.registry.seen().is_empty());
    gated.gate.notify_one();

    let report = tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .expect("keeper should stop once the late child is swept")
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(report.last_state, PluginState::Restarting);
    let pids = rt.registry.seen();
    assert_eq!(pids.len(), 1);
    assert!(!common::is_running(pids[0]));
    assert!(rt.registry.is_empty());
}
