// Process Registry Port
// Bookkeeping of live plugin processes for bulk cleanup on daemon shutdown

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Process {0} is already registered")]
    AlreadyRegistered(u32),
}

/// Process registry trait
///
/// Implementations:
/// - ProcessTable: in-memory table, kills process groups on `kill_all`
pub trait ProcessRegistry: Send + Sync {
    /// Track a running process under the given plugin identity
    ///
    /// # Errors
    /// - RegistryError::AlreadyRegistered if the PID is already tracked
    fn add(&self, pid: u32, identity: &str) -> Result<(), RegistryError>;

    /// Stop tracking a process (returns false if it was not tracked)
    fn remove(&self, pid: u32) -> bool;

    fn contains(&self, pid: u32) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forcibly terminate every tracked process
    ///
    /// Entries stay in the registry: whoever registered a process removes it
    /// once it has reaped it.
    ///
    /// # Returns
    /// Number of processes signalled
    fn kill_all(&self) -> usize;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock registry recording every registration
    #[derive(Default)]
    pub struct MockProcessRegistry {
        entries: Mutex<HashMap<u32, String>>,
        added: AtomicUsize,
        removed: AtomicUsize,
        kill_all_calls: AtomicUsize,
    }

    impl MockProcessRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn added(&self) -> usize {
            self.added.load(Ordering::SeqCst)
        }

        pub fn removed(&self) -> usize {
            self.removed.load(Ordering::SeqCst)
        }

        pub fn kill_all_calls(&self) -> usize {
            self.kill_all_calls.load(Ordering::SeqCst)
        }
    }

    impl ProcessRegistry for MockProcessRegistry {
        fn add(&self, pid: u32, identity: &str) -> Result<(), RegistryError> {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&pid) {
                return Err(RegistryError::AlreadyRegistered(pid));
            }
            entries.insert(pid, identity.to_string());
            self.added.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn remove(&self, pid: u32) -> bool {
            let removed = self.entries.lock().unwrap().remove(&pid).is_some();
            if removed {
                self.removed.fetch_add(1, Ordering::SeqCst);
            }
            removed
        }

        fn contains(&self, pid: u32) -> bool {
            self.entries.lock().unwrap().contains_key(&pid)
        }

        fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        fn kill_all(&self) -> usize {
            self.kill_all_calls.fetch_add(1, Ordering::SeqCst);
            self.len()
        }
    }
}
