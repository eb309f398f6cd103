//! The sender façade: lifecycle, submission, efficiency reporting.
//!
//! `Sender` does not spawn its own worker threads — the host application
//! drives [`Sender::run_transmit_loop`] and [`Sender::run_ack_loop`] on
//! two `std::thread::spawn`ed threads over cloned handles. Internally
//! `Sender` is a thin `Arc` wrapper, so cloning is a refcount bump and
//! the shared state is freed once every clone (and both worker closures)
//! have been dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::bitmap::AckBitmap;
use crate::callback::FrameCallback;
use crate::error::SenderError;
use crate::network::{BufferId, IoBufferParams, NetworkManager};
use crate::queue::FrameQueue;
use crate::stats::{EfficiencyRing, SenderStats};
use crate::wire::{FragmentHeader, AckWirePacket, FRAGMENT_SIZE, MAX_FRAGMENTS_PER_FRAME, MAX_FRAME_SIZE};

/// Tunable knobs for a `Sender`. `ack_wait_enabled` and `retries_enabled`
/// are ordinary runtime fields, not compile-time switches — a host can
/// flip them between frames (e.g. to drain the queue quickly at shutdown).
#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    pub fragment_size: usize,
    pub max_frame_size: usize,
    pub ack_wait_enabled: bool,
    pub retries_enabled: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            fragment_size: FRAGMENT_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
            ack_wait_enabled: true,
            retries_enabled: true,
        }
    }
}

/// The frame currently installed in the transmit/ack state machine —
/// `None` until the first frame is dequeued.
#[derive(Debug, Clone)]
pub(crate) struct CurrentFrame {
    pub(crate) frame_number: u16,
    pub(crate) buffer: Bytes,
    pub(crate) flush: bool,
}

/// State guarded by `ack_lock`.
pub(crate) struct AckState {
    pub(crate) current_frame: Option<CurrentFrame>,
    pub(crate) ack_bitmap: AckBitmap,
    pub(crate) current_frame_nb_fragments: usize,
    pub(crate) efficiency: EfficiencyRing,
}

/// State guarded by `send_lock`.
pub(crate) struct SendState {
    pub(crate) to_send_bitmap: AckBitmap,
    /// Tracks which fragment indices have been handed to the network at
    /// least once for the current frame, so repeat sends can be counted
    /// as retransmissions in `SenderStats`.
    pub(crate) first_send_bitmap: AckBitmap,
}

pub(crate) struct SenderShared {
    pub(crate) manager: Arc<dyn NetworkManager>,
    pub(crate) data_buffer: BufferId,
    pub(crate) ack_buffer: BufferId,
    pub(crate) callback: FrameCallback,
    pub(crate) config: SenderConfig,
    pub(crate) queue: FrameQueue,
    pub(crate) ack_state: Mutex<AckState>,
    pub(crate) send_state: Mutex<SendState>,
    pub(crate) current_frame_cb_was_called: Arc<AtomicBool>,
    pub(crate) threads_should_stop: AtomicBool,
    pub(crate) data_thread_started: AtomicBool,
    pub(crate) ack_thread_started: AtomicBool,
    pub(crate) stats: Mutex<SenderStats>,
}

/// Cheaply-`Clone`-able handle to a sender's shared state. See the
/// module doc comment for the threading model.
#[derive(Clone)]
pub struct Sender(pub(crate) Arc<SenderShared>);

impl Sender {
    /// Builds a new sender. `queue_capacity` must be non-zero.
    pub fn new(
        manager: Arc<dyn NetworkManager>,
        data_buffer: BufferId,
        ack_buffer: BufferId,
        callback: FrameCallback,
        queue_capacity: usize,
        config: SenderConfig,
    ) -> Result<Self, SenderError> {
        if queue_capacity == 0 {
            return Err(SenderError::BadParameters);
        }

        // No frame is in flight yet, so the readiness test that gates on
        // "the previous frame's callback already fired" is vacuously
        // true — otherwise the very first non-flush frame submitted
        // would never become ready under ack_wait_enabled.
        let current_frame_cb_was_called = Arc::new(AtomicBool::new(true));

        let queue = FrameQueue::new(queue_capacity, callback.clone(), current_frame_cb_was_called.clone());

        let shared = SenderShared {
            manager,
            data_buffer,
            ack_buffer,
            callback,
            config,
            queue,
            ack_state: Mutex::new(AckState {
                current_frame: None,
                ack_bitmap: AckBitmap::new(),
                current_frame_nb_fragments: 0,
                efficiency: EfficiencyRing::new(),
            }),
            send_state: Mutex::new(SendState {
                to_send_bitmap: AckBitmap::new(),
                first_send_bitmap: AckBitmap::new(),
            }),
            current_frame_cb_was_called,
            threads_should_stop: AtomicBool::new(false),
            data_thread_started: AtomicBool::new(false),
            ack_thread_started: AtomicBool::new(false),
            stats: Mutex::new(SenderStats::default()),
        };

        Ok(Sender(Arc::new(shared)))
    }

    /// Validates and queues a frame. Returns the backlog depth the
    /// caller was behind by before this submission (see
    /// [`FrameQueue::enqueue`]).
    pub fn submit(&self, buffer: Bytes, flush: bool) -> Result<u32, SenderError> {
        if buffer.is_empty() {
            return Err(SenderError::BadParameters);
        }
        if buffer.len() > self.0.config.max_frame_size {
            return Err(SenderError::FrameTooLarge);
        }

        match self.0.queue.enqueue(buffer, flush) {
            Ok(prev) => {
                self.0.stats.lock().unwrap().frames_submitted += 1;
                Ok(prev)
            }
            Err(err) => {
                if matches!(err, SenderError::QueueFull) {
                    self.0.stats.lock().unwrap().queue_full_rejections += 1;
                }
                Err(err)
            }
        }
    }

    /// Requests both worker loops to return at their next suspension
    /// point. Frames still waiting in the queue at that point do not
    /// receive a terminal callback — this mirrors the documented (if
    /// debatable) shutdown behavior of the system this sender is based
    /// on; see DESIGN.md.
    pub fn stop(&self) {
        self.0.threads_should_stop.store(true, Ordering::Release);
    }

    /// Returns `Busy` if either worker loop is still running. Rust's
    /// ownership model frees the shared state once every `Sender` clone
    /// and both worker closures are dropped, so this is a guard the
    /// caller can use to confirm it's safe to let the last handle drop,
    /// not a manual deallocation.
    pub fn close(&self) -> Result<(), SenderError> {
        if self.0.data_thread_started.load(Ordering::Acquire) || self.0.ack_thread_started.load(Ordering::Acquire) {
            return Err(SenderError::Busy);
        }
        Ok(())
    }

    /// Ratio of fragments needed to fragments actually sent (including
    /// retransmissions), averaged over the trailing window of frames.
    pub fn estimated_efficiency(&self) -> f32 {
        self.0.ack_state.lock().unwrap().efficiency.ratio()
    }

    /// Snapshot of the accumulated counters.
    pub fn stats(&self) -> SenderStats {
        self.0.stats.lock().unwrap().clone()
    }

    pub fn init_data_buffer_params(&self) -> IoBufferParams {
        IoBufferParams {
            buffer_id: self.0.data_buffer,
            max_packet_size: self.0.config.fragment_size + FragmentHeader::ENCODED_LEN,
            max_in_flight: MAX_FRAGMENTS_PER_FRAME,
            ack_buffer: false,
        }
    }

    pub fn init_ack_buffer_params(&self) -> IoBufferParams {
        IoBufferParams {
            buffer_id: self.0.ack_buffer,
            max_packet_size: AckWirePacket::ENCODED_LEN,
            max_in_flight: 1,
            ack_buffer: true,
        }
    }
}
