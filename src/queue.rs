//! Bounded frame queue with priority-flush preemption and a
//! retry-cadence-aware blocking dequeue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::callback::{CallbackStatus, FrameCallback};
use crate::error::SenderError;
use crate::network::NetworkManager;
use crate::wire::{DEFAULT_ESTIMATED_LATENCY_MS, MAX_RETRY_MS, MIN_RETRY_MS, RETRIES_DISABLED_WAIT_MS, RETRY_SLACK_MS};

/// One queued, not-yet-installed frame.
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    pub frame_number: u16,
    pub buffer: Bytes,
    pub high_priority: bool,
}

impl FrameDescriptor {
    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}

/// Runtime toggles `dequeue` consults every call; both are ordinary
/// `SenderConfig` fields, not compile-time switches.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub ack_wait_enabled: bool,
    pub retries_enabled: bool,
}

struct QueueState {
    ring: Vec<Option<FrameDescriptor>>,
    add_idx: usize,
    get_idx: usize,
    count: usize,
    next_frame_number: u16,
}

/// Bounded ring buffer of waiting frames, guarded by a `Mutex` +
/// `Condvar` pair in the shape of the thread-based condvar idiom used
/// elsewhere in this codebase for producer/consumer handoff.
pub struct FrameQueue {
    max_queue: usize,
    state: Mutex<QueueState>,
    cv: Condvar,
    callback: FrameCallback,
    current_frame_cb_was_called: Arc<AtomicBool>,
}

impl FrameQueue {
    pub fn new(max_queue: usize, callback: FrameCallback, current_frame_cb_was_called: Arc<AtomicBool>) -> Self {
        let mut ring = Vec::with_capacity(max_queue);
        ring.resize_with(max_queue, || None);
        Self {
            max_queue,
            state: Mutex::new(QueueState {
                ring,
                add_idx: 0,
                get_idx: 0,
                count: 0,
                next_frame_number: 0,
            }),
            cv: Condvar::new(),
            callback,
            current_frame_cb_was_called,
        }
    }

    /// Enqueues `buffer`, flushing any already-waiting frames first if
    /// `flush` is set. Returns the number of frames the caller was behind
    /// by *before* this submission (and before any flush), matching the
    /// backlog-depth reporting of the source this queue is modeled on.
    pub fn enqueue(&self, buffer: Bytes, flush: bool) -> Result<u32, SenderError> {
        let mut state = self.state.lock().unwrap();

        let cb_called = self.current_frame_cb_was_called.load(Ordering::Acquire);
        let prev = state.count as u32 + u32::from(!cb_called);

        if flush {
            self.flush_locked(&mut state);
        }

        if state.count == self.max_queue {
            return Err(SenderError::QueueFull);
        }

        state.next_frame_number = state.next_frame_number.wrapping_add(1);
        let frame_number = state.next_frame_number;
        let idx = state.add_idx;
        state.ring[idx] = Some(FrameDescriptor {
            frame_number,
            buffer,
            high_priority: flush,
        });
        state.add_idx = (state.add_idx + 1) % self.max_queue;
        state.count += 1;

        self.cv.notify_one();
        Ok(prev)
    }

    /// Blocks until a frame is ready to send or the retry-cadence timeout
    /// elapses, whichever comes first. Returns `None` on timeout with
    /// nothing ready — the transmit loop treats that as "nothing new,
    /// re-run the retransmit pass".
    pub fn dequeue(&self, net: &dyn NetworkManager, cfg: &RetryConfig) -> Option<FrameDescriptor> {
        let mut state = self.state.lock().unwrap();

        if let Some(frame) = self.try_take_ready(&mut state, cfg) {
            return Some(frame);
        }

        let budget = Duration::from_millis(Self::compute_wait_ms(net, cfg) as u64);
        let start = Instant::now();

        loop {
            let elapsed = Instant::now().duration_since(start);
            let remaining = budget.saturating_sub(elapsed);
            if remaining.is_zero() {
                return None;
            }

            let (guard, _timeout) = self.cv.wait_timeout(state, remaining).unwrap();
            state = guard;

            if let Some(frame) = self.try_take_ready(&mut state, cfg) {
                return Some(frame);
            }
            if Instant::now().duration_since(start) >= budget {
                return None;
            }
        }
    }

    /// Signals the queue's condvar without touching its contents — used
    /// by the ack loop to wake a blocked `dequeue` once the current
    /// frame's callback has fired, without ever holding `ack_lock` and
    /// `queue_lock` at the same time.
    pub fn notify_frame_complete(&self) {
        let _guard = self.state.lock().unwrap();
        self.cv.notify_one();
    }

    fn try_take_ready(&self, state: &mut QueueState, cfg: &RetryConfig) -> Option<FrameDescriptor> {
        if state.count == 0 {
            return None;
        }
        let idx = state.get_idx;
        let ready = {
            let head = state.ring[idx].as_ref().expect("count > 0 implies a descriptor at get_idx");
            head.high_priority
                || !cfg.ack_wait_enabled
                || self.current_frame_cb_was_called.load(Ordering::Acquire)
        };
        if !ready {
            return None;
        }
        let frame = state.ring[idx].take().expect("checked above");
        state.get_idx = (state.get_idx + 1) % self.max_queue;
        state.count -= 1;
        Some(frame)
    }

    /// Cancels every currently-waiting frame (invoking the callback with
    /// `Cancel` for each) while still holding `queue_lock`, matching the
    /// source behavior this queue is modeled on.
    fn flush_locked(&self, state: &mut QueueState) {
        while state.count > 0 {
            let idx = state.get_idx;
            if let Some(frame) = state.ring[idx].take() {
                (self.callback)(CallbackStatus::Cancel, frame.buffer);
            }
            state.get_idx = (state.get_idx + 1) % self.max_queue;
            state.count -= 1;
        }
        state.count = 0;
        state.get_idx = state.add_idx;
    }

    fn compute_wait_ms(net: &dyn NetworkManager, cfg: &RetryConfig) -> u32 {
        if !cfg.retries_enabled {
            return RETRIES_DISABLED_WAIT_MS;
        }
        let latency = net.estimated_latency_ms().unwrap_or(DEFAULT_ESTIMATED_LATENCY_MS);
        (latency + RETRY_SLACK_MS).clamp(MIN_RETRY_MS, MAX_RETRY_MS)
    }
}
