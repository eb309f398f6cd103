//! The application-facing frame completion callback.

use std::sync::Arc;

use bytes::Bytes;

/// Terminal status delivered exactly once per submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Every fragment of the frame was acked.
    Sent,
    /// The frame was superseded (by a flush, or by replacement while still
    /// unacked) before it completed.
    Cancel,
}

/// Invoked from whichever worker thread observes the frame's terminal
/// state — never synchronously from `Sender::submit`. The buffer handed
/// back is the same `Bytes` the caller submitted, so callers that need to
/// recycle or inspect it on cancellation can do so without a second copy.
pub type FrameCallback = Arc<dyn Fn(CallbackStatus, Bytes) + Send + Sync>;
