//! Apply callbacks and cancellation
//!
//! These traits let the engine report progress and ask for confirmation
//! without depending on a particular terminal UI.

use crate::executor::NodeOutcome;
use crate::planner::Action;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for apply operations
///
/// Implement this trait to receive progress updates while waves run.
pub trait ProgressCallback: Send {
    /// Called when a wave of independent nodes starts
    fn on_wave_start(&mut self, wave: usize, count: usize);

    /// Called before the provider is invoked for a node
    fn on_node_start(&mut self, id: &str, action: Action);

    /// Called when a node finishes (including failures and skips)
    fn on_node_complete(&mut self, id: &str, outcome: &NodeOutcome);

    /// Called when a wave completes
    fn on_wave_complete(&mut self, wave: usize);
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
    fn on_wave_start(&mut self, _wave: usize, _count: usize) {}
    fn on_node_start(&mut self, _id: &str, _action: Action) {}
    fn on_node_complete(&mut self, _id: &str, _outcome: &NodeOutcome) {}
    fn on_wave_complete(&mut self, _wave: usize) {}
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

/// Cooperative cancellation flag shared with a signal handler.
///
/// Checked between waves; nodes already in flight run to completion.
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
