//! Progress, confirmation and cancellation hooks
//!
//! These traits let the engine run without depending on a terminal.
//! The binary plugs in progress bars and interactive prompts.

use crate::error::Result;
use crate::types::{Operation, SubsystemId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for reconciliation passes
///
/// Called from worker threads under a lock, one subsystem at a time.
pub trait ProgressCallback: Send {
    /// Called before any subsystem of a pass starts
    fn on_pass_start(&mut self, operation: Operation, count: usize);

    /// Called when one subsystem's work is done
    fn on_subsystem_complete(&mut self, id: &SubsystemId, ok: bool);

    /// Called after every subsystem reported
    fn on_pass_complete(&mut self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_pass_start(&mut self, _operation: Operation, _count: usize) {}
    fn on_subsystem_complete(&mut self, _id: &SubsystemId, _ok: bool) {}
    fn on_pass_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Shared flag that stops a pass from starting further subsystems.
///
/// Subsystems already running finish and keep their writes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_auto_callbacks() {
        assert!(AutoConfirm.confirm("go?").unwrap());
        assert!(!AutoDecline.confirm("go?").unwrap());
    }
}
