use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest single slice the interruptible sleep will wait before re-checking
/// its token; a stop request therefore takes effect within one slice.
const CANCEL_POLL_SLICE_MS: u64 = 250;

/// Cooperative cancellation flag shared between an owner and its worker.
///
/// Checked at step and iteration boundaries only; a unit of work already in
/// flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Sleeps for `duration` in bounded slices, returning early when the token is
/// cancelled. Returns `true` when the full duration elapsed uninterrupted.
pub async fn sleep_unless_cancelled(token: &CancelToken, duration: Duration) -> bool {
    let mut remaining = duration;
    let slice = Duration::from_millis(CANCEL_POLL_SLICE_MS);
    while !remaining.is_zero() {
        if token.is_cancelled() {
            return false;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
    !token.is_cancelled()
}
