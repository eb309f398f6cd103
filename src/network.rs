//! `NetworkManager` trait consumed from the transport layer.
//!
//! Mirrors the role `strata-bonding`'s `LinkSender` plays for
//! `TransportLink`: the sender core is written against this trait so it
//! never depends on a concrete socket type and can be driven in tests by
//! an in-memory loopback.

use std::time::Duration;

use thiserror::Error;

/// Identifies one of the two IO buffers (data, ack) a sender uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Outcome of a single fragment send, delivered to the per-fragment
/// completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The network layer has handed the fragment off (not necessarily
    /// delivered — only that it left the sender's responsibility).
    Sent,
    /// The send was superseded before it left the outbound buffer.
    Cancelled,
}

/// Boxed, single-use completion callback passed into `NetworkManager::send`.
pub type SendCallback = Box<dyn FnOnce(SendStatus) + Send>;

/// Errors surfaced by a blocking read on an IO buffer.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("buffer empty")]
    BufferEmpty,
    #[error("short read: got {got} bytes, expected {expected}")]
    ShortRead { got: usize, expected: usize },
    #[error("network read error: {0}")]
    Other(String),
}

/// Errors surfaced by a non-blocking send request.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("network send error: {0}")]
    Other(String),
}

/// Buffer configuration handed to the network manager during setup,
/// produced by `Sender::init_data_buffer_params` /
/// `Sender::init_ack_buffer_params`.
#[derive(Debug, Clone)]
pub struct IoBufferParams {
    pub buffer_id: BufferId,
    pub max_packet_size: usize,
    pub max_in_flight: usize,
    pub ack_buffer: bool,
}

/// Abstraction over the external network manager the sender core is
/// driven against. Implementations are expected to be cheap to call and
/// safe to invoke from either worker thread concurrently.
pub trait NetworkManager: Send + Sync {
    /// Queues `data` for transmission on `buf`, invoking `on_complete`
    /// exactly once when the network layer is done with it.
    fn send(&self, buf: BufferId, data: &[u8], on_complete: SendCallback) -> Result<(), SendError>;

    /// Blocks for up to `timeout` waiting for a datagram on `buf`, copying
    /// it into `out` and returning its length.
    fn read_with_timeout(&self, buf: BufferId, out: &mut [u8], timeout: Duration) -> Result<usize, ReadError>;

    /// Discards whatever is currently queued for send on `buf`.
    fn flush_input_buffer(&self, buf: BufferId);

    /// Latest one-way latency estimate, if the network manager has one.
    fn estimated_latency_ms(&self) -> Option<u32>;
}
