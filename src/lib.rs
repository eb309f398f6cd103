//! # fragstream-sender
//!
//! Sender-side control plane for a reliable, fragmented, frame-oriented
//! streaming protocol over an unreliable datagram transport (UDP in
//! practice). Accepts application frames, splits them into fixed-size
//! fragments, transmits them through a pluggable [`network::NetworkManager`],
//! listens for selective-acknowledgement packets from the peer, selectively
//! retransmits missing fragments, and reports per-frame completion and
//! cancellation back to the application.
//!
//! ## Crate structure
//!
//! - [`bitmap`] — Fixed 128-bit ack bitset
//! - [`queue`] — Bounded, priority-flush-aware frame queue
//! - [`transmit`] — Transmit loop: fragmentation and selective-repeat retransmission
//! - [`ack`] — Ack loop: peer ack ingestion and completion detection
//! - [`sender`] — The sender façade: lifecycle, submission, efficiency
//! - [`wire`] — On-wire layouts for fragment headers and ack packets, and protocol constants
//! - [`network`] — `NetworkManager` trait consumed from the transport layer
//! - [`callback`] — The application-facing frame completion callback
//! - [`stats`] — Efficiency ring and aggregate sender statistics
//! - [`error`] — Sender error taxonomy
//!
//! ## Threading model
//!
//! Exactly two worker threads are spawned per sender by the host
//! application: [`sender::Sender::run_transmit_loop`] and
//! [`sender::Sender::run_ack_loop`], driven over cloned `Sender` handles.
//! `Sender::submit`, `stop`, `close`, and `estimated_efficiency` are called
//! from the application thread. See `DESIGN.md` for the lock-ordering
//! invariant the two loops share.

pub mod ack;
pub mod bitmap;
pub mod callback;
pub mod error;
pub mod network;
pub mod queue;
pub mod sender;
pub mod stats;
pub mod transmit;
pub mod wire;

pub use callback::{CallbackStatus, FrameCallback};
pub use error::SenderError;
pub use network::{BufferId, IoBufferParams, NetworkManager, ReadError, SendCallback, SendError, SendStatus};
pub use sender::{Sender, SenderConfig};
pub use stats::SenderStats;
