//! Lookup read scope
//!
//! While a lookup runs, snapshots taken by an external snapshot service must
//! not capture transient read-path state. The runtime enters a [`ReadScope`]
//! for every lookup; the guard registers with the [`SnapshotCoordinator`]
//! and unregisters on drop, so early returns and failures clear it too.

use std::sync::atomic::{AtomicUsize, Ordering};
use strata_storage::ExecutionContext;

/// Tracks lookups in flight for a snapshot service
#[derive(Debug, Default)]
pub struct SnapshotCoordinator {
    active_reads: AtomicUsize,
}

impl SnapshotCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookups currently inside a read scope
    pub fn active_reads(&self) -> usize {
        self.active_reads.load(Ordering::SeqCst)
    }

    /// Whether a snapshot taken now must skip read-path state
    pub fn skip_read_state(&self) -> bool {
        self.active_reads() > 0
    }
}

/// RAII guard around one lookup
#[derive(Debug)]
pub struct ReadScope<'a> {
    coordinator: Option<&'a SnapshotCoordinator>,
}

impl<'a> ReadScope<'a> {
    pub fn enter(coordinator: Option<&'a SnapshotCoordinator>) -> Self {
        if let Some(coordinator) = coordinator {
            coordinator.active_reads.fetch_add(1, Ordering::SeqCst);
        }
        Self { coordinator }
    }

    /// Context passed to every storage read made inside the scope
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::read_path()
    }
}

impl Drop for ReadScope<'_> {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator {
            coordinator.active_reads.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_registers_and_clears() {
        let coordinator = SnapshotCoordinator::new();
        {
            let outer = ReadScope::enter(Some(&coordinator));
            assert!(outer.context().skip_snapshot);
            let _inner = ReadScope::enter(Some(&coordinator));
            assert_eq!(coordinator.active_reads(), 2);
        }
        assert_eq!(coordinator.active_reads(), 0);
        assert!(!coordinator.skip_read_state());
    }

    #[test]
    fn test_scope_cleared_on_error_path() {
        fn failing(coordinator: &SnapshotCoordinator) -> Result<(), String> {
            let _scope = ReadScope::enter(Some(coordinator));
            assert!(coordinator.skip_read_state());
            Err("storage unavailable".to_string())
        }
        let coordinator = SnapshotCoordinator::new();
        assert!(failing(&coordinator).is_err());
        assert_eq!(coordinator.active_reads(), 0);
    }

    #[test]
    fn test_scope_without_coordinator() {
        let scope = ReadScope::enter(None);
        assert_eq!(scope.context(), ExecutionContext::read_path());
    }
}
