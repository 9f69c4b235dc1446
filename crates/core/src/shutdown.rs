//! # Shutdown Coordinator
//!
//! Cooperative interrupt handling. The first signal requests a drain:
//! the executor finishes the current stage, checkpoints, and routes to
//! synthesis so a partial report still lands. A second signal within
//! two seconds upgrades to an immediate abort; the last checkpoint
//! remains valid either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const ABORT_WINDOW: Duration = Duration::from_secs(2);

/// What the caller should do after delivering a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Drain cooperatively to the next checkpoint, then synthesize.
    Drain,
    /// Stop now; state on disk is already consistent.
    Abort,
}

#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    should_stop: AtomicBool,
    abort: AtomicBool,
    last_signal: Mutex<Option<Instant>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an external interrupt. Two signals inside the abort
    /// window escalate from drain to abort.
    pub fn signal(&self) -> ShutdownAction {
        let mut last = self.last_signal.lock().expect("shutdown lock poisoned");
        let now = Instant::now();

        let action = match *last {
            Some(previous) if now.duration_since(previous) <= ABORT_WINDOW => {
                self.abort.store(true, Ordering::SeqCst);
                ShutdownAction::Abort
            }
            _ => ShutdownAction::Drain,
        };

        *last = Some(now);
        self.should_stop.store(true, Ordering::SeqCst);

        tracing::info!(action = ?action, "shutdown_signal");
        action
    }

    /// Whether a drain has been requested. Stages check this at loop
    /// boundaries and between provider calls.
    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    /// Whether the run must stop immediately.
    pub fn is_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_drains() {
        let shutdown = ShutdownCoordinator::new();
        assert!(!shutdown.should_stop());

        assert_eq!(shutdown.signal(), ShutdownAction::Drain);
        assert!(shutdown.should_stop());
        assert!(!shutdown.is_abort());
    }

    #[test]
    fn test_second_signal_within_window_aborts() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.signal();
        assert_eq!(shutdown.signal(), ShutdownAction::Abort);
        assert!(shutdown.is_abort());
    }
}
