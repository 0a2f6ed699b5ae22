use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared control handle for one running workflow.
///
/// Pause and cancel are cooperative flags checked between steps, never
/// preemptive — a step already in flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct WorkflowControl {
    inner: Arc<ControlInner>,
}

#[derive(Debug, Default)]
struct ControlInner {
    paused: AtomicBool,
    cancel_requested: AtomicBool,
}

impl WorkflowControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a pause at the next step boundary. The session lock is
    /// retained while paused.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    /// Clears the pause flag; a paused workflow continues from its current
    /// step, never from the first.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    /// Requests cancellation; takes effect at the next step boundary, even
    /// while paused.
    pub fn cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }
}
