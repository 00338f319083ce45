//! Cleanup guarantees with real child processes
//!
//! No process, registration or session may outlive its attempt.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{is_running, local_runtime, runtime_with_broker, sh, wait_until};
use plugin_runtime_core::application::PluginRuntime;
use plugin_runtime_core::domain::PluginState;
use plugin_runtime_core::port::stdio_broker::mocks::MockStdioBroker;
use plugin_runtime_core::port::{LaunchCommand, ProcessRegistry};
use plugin_runtime_core::RuntimeError;

#[tokio::test]
async fn test_relay_failure_kills_running_child() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(MockStdioBroker::new_failing("transport reset"));
    let (supervisor, registry) = runtime_with_broker(
        dir.path(),
        LaunchCommand::new("sleep").with_args(["30"]),
        broker.clone(),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), supervisor.start())
        .await
        .expect("attempt should be torn down promptly");

    assert!(matches!(result, Err(RuntimeError::Relay(_))));
    assert_eq!(supervisor.state(), PluginState::Restarting);

    let pids = registry.seen();
    assert_eq!(pids.len(), 1);
    assert!(!is_running(pids[0]));
    assert!(registry.is_empty());
    assert_eq!(broker.registered(), 1);
    assert_eq!(broker.live_sessions(), 0);
    assert!(supervisor.stdio_handle().is_none());
    assert!(supervisor.wait().unwrap().is_done());
}

#[tokio::test]
async fn test_child_outliving_its_pipes_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let rt = local_runtime(dir.path(), sh("exec >&- 2>&-; sleep 30"));

    tokio::time::timeout(Duration::from_secs(5), rt.supervisor.start())
        .await
        .expect("attempt should end after the exit grace")
        .unwrap();

    // Killed rather than exited: counts as a failure
    assert_eq!(rt.supervisor.state(), PluginState::Restarting);
    let pids = rt.registry.seen();
    assert!(!is_running(pids[0]));
    assert!(rt.registry.is_empty());
}

#[tokio::test]
async fn test_kill_all_ends_running_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let rt = local_runtime(dir.path(), LaunchCommand::new("sleep").with_args(["30"]));

    let supervisor = rt.supervisor.clone();
    let attempt = tokio::spawn(async move { supervisor.start().await });
    wait_until(|| !rt.registry.is_empty()).await;

    assert_eq!(rt.registry.kill_all(), 1);

    tokio::time::timeout(Duration::from_secs(5), attempt)
        .await
        .expect("killed plugin should end the attempt")
        .unwrap()
        .unwrap();
    assert_eq!(rt.supervisor.state(), PluginState::Restarting);
    assert!(rt.registry.is_empty());
    assert!(rt.broker.is_empty());
}

#[tokio::test]
async fn test_kill_all_reaches_forked_descendants() {
    let dir = tempfile::tempdir().unwrap();
    // The background sleep inherits the pipes, so the attempt cannot end on its own
    let mut rt = local_runtime(dir.path(), sh("sleep 30 & echo $!; exit 0"));

    let supervisor = rt.supervisor.clone();
    let attempt = tokio::spawn(async move { supervisor.start().await });

    let frame = tokio::time::timeout(Duration::from_secs(5), rt.frames.recv())
        .await
        .expect("plugin should print the background pid")
        .unwrap();
    let grandchild: u32 = frame.text().trim().parse().unwrap();
    assert!(is_running(grandchild));

    rt.registry.kill_all();

    tokio::time::timeout(Duration::from_secs(5), attempt)
        .await
        .expect("attempt should end once the process group is gone")
        .unwrap()
        .unwrap();

    wait_until(|| !is_running(grandchild)).await;
    assert!(rt.registry.is_empty());
}
