//! Progress and cancellation for long running catalog work.
//!
//! Callers hand a monitor to every population and flush. The core only
//! polls it; it never spawns work of its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Polled during fetches and DDL execution.
pub trait ProgressMonitor: Send + Sync {
    /// Returns true once the caller asked to stop.
    fn is_cancelled(&self) -> bool;

    /// Announces a named unit of work.
    fn begin_task(&self, _name: &str) {}
}

/// Monitor that never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl ProgressMonitor for NullMonitor {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Monitor backed by a shared flag; clones observe the same cancellation.
#[derive(Debug, Default, Clone)]
pub struct CancellationMonitor {
    cancelled: Arc<AtomicBool>,
}

impl CancellationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of whatever is running under this monitor.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl ProgressMonitor for CancellationMonitor {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn begin_task(&self, name: &str) {
        tracing::debug!(task = name, "Task started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_cancellation() {
        let monitor = CancellationMonitor::new();
        let other = monitor.clone();
        assert!(!other.is_cancelled());
        monitor.cancel();
        assert!(other.is_cancelled());
        assert!(!NullMonitor.is_cancelled());
    }
}
