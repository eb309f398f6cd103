//! Sender error taxonomy.

use thiserror::Error;

/// Errors returned synchronously from the sender façade.
///
/// Decode failures on the wire (malformed fragment headers, truncated ack
/// packets) are *not* part of this taxonomy — they are logged and discarded
/// by the worker loops that encounter them. No condition is considered
/// fatal inside the workers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SenderError {
    /// A constructor or `submit` argument failed validation.
    #[error("bad parameters")]
    BadParameters,
    /// A sub-resource failed to allocate during construction.
    #[error("allocation failed")]
    Alloc,
    /// Submitted frame would require more than 128 fragments.
    #[error("frame too large: exceeds the 128-fragment limit")]
    FrameTooLarge,
    /// The frame queue is at capacity.
    #[error("frame queue is full")]
    QueueFull,
    /// `close` was called while a worker loop is still running.
    #[error("worker thread still running")]
    Busy,
}
