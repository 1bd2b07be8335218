//! Handles for controlling a run from another thread.

use super::progress::{Progress, ProgressTracker};
use super::RunOutcome;
use crate::core::comparator::DuplicateGroup;
use crate::error::{panic_message, EngineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// Cooperative stop signal shared between a caller and a run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop. In-flight work still finishes and is persisted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Handle to a run executing on a background thread
pub struct RunHandle {
    pub(super) token: CancellationToken,
    pub(super) progress: Arc<ProgressTracker>,
    pub(super) groups: Arc<RwLock<Option<Vec<DuplicateGroup>>>>,
    pub(super) thread: JoinHandle<Result<RunOutcome>>,
}

impl RunHandle {
    /// Request a graceful stop; the run ends Interrupted and can be resumed
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Token that stops this run, for callers that outlive a borrow of the
    /// handle (signal handlers, watchdogs)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn progress(&self) -> Progress {
        self.progress.snapshot()
    }

    /// Groups, once the run has been reported
    pub fn result(&self) -> Option<Vec<DuplicateGroup>> {
        self.groups.read().ok().and_then(|groups| groups.clone())
    }

    /// Whether the background thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the run ends
    pub fn wait(self) -> Result<RunOutcome> {
        self.thread
            .join()
            .unwrap_or_else(|payload| Err(EngineError::Pool(panic_message(payload.as_ref()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn clones_share_cancellation() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn handle_token_stops_the_run_from_another_thread() {
        let token = CancellationToken::new();
        let run_token = token.clone();
        let handle = RunHandle {
            token,
            progress: Arc::new(ProgressTracker::new()),
            groups: Arc::new(RwLock::new(None)),
            thread: std::thread::spawn(move || {
                while !run_token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(EngineError::Pool("stopped".to_string()))
            }),
        };

        let interrupt = handle.cancellation_token();
        std::thread::spawn(move || interrupt.cancel()).join().unwrap();

        assert!(matches!(handle.wait(), Err(EngineError::Pool(_))));
    }
}
