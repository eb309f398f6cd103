//! Ack loop: consumes peer ack packets, merges them into the current
//! frame's ack bitmap, and fires the `SENT` callback on the first full-ack
//! transition.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::bitmap::AckBitmap;
use crate::callback::CallbackStatus;
use crate::network::ReadError;
use crate::sender::Sender;
use crate::wire::AckWirePacket;

/// How long a single read blocks before the loop re-checks `stop()`.
const ACK_READ_TIMEOUT: Duration = Duration::from_secs(1);

impl Sender {
    /// Runs until [`Sender::stop`] is observed. Intended to be driven on a
    /// dedicated thread spawned by the host application over a cloned
    /// `Sender` handle, alongside [`Sender::run_transmit_loop`].
    pub fn run_ack_loop(&self) {
        let inner = &self.0;
        inner.ack_thread_started.store(true, Ordering::Release);
        tracing::debug!("ack loop started");

        let mut buf = [0u8; AckWirePacket::ENCODED_LEN];

        while !inner.threads_should_stop.load(Ordering::Acquire) {
            match inner.manager.read_with_timeout(inner.ack_buffer, &mut buf, ACK_READ_TIMEOUT) {
                Ok(len) => {
                    if len < AckWirePacket::ENCODED_LEN {
                        tracing::warn!(len, expected = AckWirePacket::ENCODED_LEN, "short ack read");
                        continue;
                    }
                    let mut cursor = &buf[..len];
                    let Some(pkt) = AckWirePacket::decode(&mut cursor) else {
                        tracing::warn!("malformed ack packet, dropping");
                        continue;
                    };
                    self.handle_ack(AckBitmap::from_wire(&pkt));
                }
                Err(ReadError::BufferEmpty) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "ack read error");
                    continue;
                }
            }
        }

        inner.ack_thread_started.store(false, Ordering::Release);
        tracing::debug!("ack loop stopped");
    }

    fn handle_ack(&self, recv: AckBitmap) {
        let inner = &self.0;
        let mut ack_state = inner.ack_state.lock().unwrap();

        if recv.frame_number != ack_state.ack_bitmap.frame_number {
            tracing::debug!(
                got = recv.frame_number,
                expected = ack_state.ack_bitmap.frame_number,
                "stale ack discarded"
            );
            return;
        }

        ack_state.ack_bitmap.set_flags(&recv);

        let already_called = inner.current_frame_cb_was_called.load(Ordering::Acquire);
        if !already_called && ack_state.ack_bitmap.all_set(ack_state.current_frame_nb_fragments) {
            let frame_number = ack_state.ack_bitmap.frame_number;
            let buffer = ack_state.current_frame.as_ref().map(|f| f.buffer.clone());
            inner.current_frame_cb_was_called.store(true, Ordering::Release);
            drop(ack_state);

            if let Some(buffer) = buffer {
                tracing::debug!(frame_number, "frame fully acked");
                (inner.callback)(CallbackStatus::Sent, buffer);
                inner.stats.lock().unwrap().frames_sent += 1;
            }

            inner.queue.notify_frame_complete();
        }
    }
}
