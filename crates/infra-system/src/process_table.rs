// Process table - in-memory registry of live plugin processes
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use plugin_runtime_core::port::process_registry::{ProcessRegistry, RegistryError};

/// In-memory process registry
///
/// Plugins are spawned as process group leaders, so `kill_all` signals each
/// tracked PID as a group and takes their descendants down too.
#[derive(Default)]
pub struct ProcessTable {
    entries: Mutex<HashMap<u32, String>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity a PID was registered under
    pub fn identity_of(&self, pid: u32) -> Option<String> {
        self.entries().get(&pid).cloned()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u32, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessRegistry for ProcessTable {
    fn add(&self, pid: u32, identity: &str) -> Result<(), RegistryError> {
        let mut entries = self.entries();
        if entries.contains_key(&pid) {
            return Err(RegistryError::AlreadyRegistered(pid));
        }
        entries.insert(pid, identity.to_string());
        Ok(())
    }

    fn remove(&self, pid: u32) -> bool {
        self.entries().remove(&pid).is_some()
    }

    fn contains(&self, pid: u32) -> bool {
        self.entries().contains_key(&pid)
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn kill_all(&self) -> usize {
        let snapshot: Vec<(u32, String)> = self
            .entries()
            .iter()
            .map(|(pid, identity)| (*pid, identity.clone()))
            .collect();

        let mut signalled = 0;
        for (pid, identity) in snapshot {
            match kill_process_group(pid) {
                Ok(()) => {
                    info!(pid = %pid, identity = %identity, "Killed plugin process group");
                    signalled += 1;
                }
                Err(e) => {
                    warn!(pid = %pid, identity = %identity, error = %e, "Failed to kill plugin process");
                }
            }
        }
        signalled
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> Result<(), String> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    killpg(pid, Signal::SIGKILL)
        .or_else(|_| kill(pid, Signal::SIGKILL))
        .map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) -> Result<(), String> {
    Err(format!("process {} cannot be signalled on this platform", pid))
}
