//! In-flight request handle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Best-effort handle for an in-flight network operation.
///
/// The handle can be shared with another thread to cancel the network
/// portion of a request or observe its progress. Cancelling a `Both`-policy
/// read only affects the network delivery; the local snapshot already
/// delivered stands.
#[derive(Debug, Default)]
pub struct RequestHandle {
    cancelled: AtomicBool,
    progress_permille: AtomicU32,
}

impl RequestHandle {
    /// Creates a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the in-flight network operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Records progress as a fraction in `[0, 1]`.
    pub fn set_progress(&self, fraction: f32) {
        let clamped = fraction.clamp(0.0, 1.0);
        self.progress_permille
            .store((clamped * 1000.0) as u32, Ordering::SeqCst);
    }

    /// Returns the reported progress as a fraction in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.progress_permille.load(Ordering::SeqCst) as f32 / 1000.0
    }
}
