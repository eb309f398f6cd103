//! Transmit loop: drains the frame queue, installs the next frame,
//! and re-fragments the current frame's still-unacked fragments every
//! iteration.

use std::sync::atomic::Ordering;

use bytes::{Bytes, BytesMut};

use crate::bitmap::AckBitmap;
use crate::callback::CallbackStatus;
use crate::network::SendStatus;
use crate::queue::RetryConfig;
use crate::sender::{CurrentFrame, Sender};
use crate::wire::FragmentHeader;

impl Sender {
    /// Runs until [`Sender::stop`] is observed. Intended to be driven on
    /// a dedicated thread spawned by the host application over a cloned
    /// `Sender` handle.
    pub fn run_transmit_loop(&self) {
        let inner = &self.0;
        inner.data_thread_started.store(true, Ordering::Release);
        tracing::debug!("transmit loop started");

        let mut nb_fragments: usize = 0;
        let mut last_fragment_size: usize = 0;
        let mut send_counter: u32 = 0;
        let mut header = FragmentHeader {
            frame_number: 0,
            flush: false,
            fragment_number: 0,
            fragments_per_frame: 0,
        };
        let mut scratch = BytesMut::with_capacity(inner.config.fragment_size + FragmentHeader::ENCODED_LEN);

        while !inner.threads_should_stop.load(Ordering::Acquire) {
            let retry_cfg = RetryConfig {
                ack_wait_enabled: inner.config.ack_wait_enabled,
                retries_enabled: inner.config.retries_enabled,
            };
            let next = inner.queue.dequeue(inner.manager.as_ref(), &retry_cfg);

            if let Some(frame) = next {
                let mut ack_state = inner.ack_state.lock().unwrap();

                ack_state.efficiency.roll(nb_fragments as u32, send_counter);
                send_counter = 0;

                if !inner.current_frame_cb_was_called.load(Ordering::Acquire) {
                    inner.manager.flush_input_buffer(inner.data_buffer);
                    if let Some(cur) = &ack_state.current_frame {
                        tracing::debug!(frame_number = cur.frame_number, "cancelling superseded frame");
                        (inner.callback)(CallbackStatus::Cancel, cur.buffer.clone());
                        inner.stats.lock().unwrap().frames_cancelled += 1;
                    }
                }
                inner.current_frame_cb_was_called.store(false, Ordering::Release);

                let frame_number = frame.frame_number;
                let size = frame.buffer.len();

                ack_state.ack_bitmap = AckBitmap::new();
                ack_state.ack_bitmap.frame_number = frame_number;

                nb_fragments = size / inner.config.fragment_size;
                last_fragment_size = inner.config.fragment_size;
                if size % inner.config.fragment_size != 0 {
                    nb_fragments += 1;
                    last_fragment_size = size % inner.config.fragment_size;
                }
                ack_state.current_frame_nb_fragments = nb_fragments;

                header.frame_number = frame_number;
                header.flush = frame.high_priority;

                ack_state.current_frame = Some(CurrentFrame {
                    frame_number,
                    buffer: frame.buffer,
                    flush: frame.high_priority,
                });

                drop(ack_state);

                let mut send_state = inner.send_state.lock().unwrap();
                send_state.to_send_bitmap = AckBitmap::new();
                send_state.to_send_bitmap.frame_number = frame_number;
                send_state.first_send_bitmap = AckBitmap::new();

                tracing::debug!(frame_number, nb_fragments, size, "installed new frame");
            }

            // Retransmit pass: recomputed from the ack bitmap every
            // iteration, whether or not a new frame was just installed.
            let installed: Option<(CurrentFrame, Vec<(usize, bool)>)> = {
                let mut send_state = inner.send_state.lock().unwrap();
                let ack_state = inner.ack_state.lock().unwrap();

                ack_state.current_frame.clone().map(|current| {
                    send_state.to_send_bitmap = AckBitmap::new();
                    send_state.to_send_bitmap.frame_number = current.frame_number;

                    let mut indices = Vec::new();
                    for c in 0..nb_fragments {
                        if !ack_state.ack_bitmap.is_set(c) {
                            send_state.to_send_bitmap.set_flag(c);
                            let is_retransmit = send_state.first_send_bitmap.is_set(c);
                            if !is_retransmit {
                                send_state.first_send_bitmap.set_flag(c);
                            }
                            indices.push((c, is_retransmit));
                        }
                    }
                    (current, indices)
                })
            };

            let Some((current, to_send)) = installed else {
                continue;
            };

            self.send_fragments(&to_send, &current, &mut header, &mut scratch, nb_fragments, last_fragment_size, &mut send_counter);
        }

        inner.data_thread_started.store(false, Ordering::Release);
        tracing::debug!("transmit loop stopped");
    }

    #[allow(clippy::too_many_arguments)]
    fn send_fragments(
        &self,
        to_send: &[(usize, bool)],
        current: &CurrentFrame,
        header: &mut FragmentHeader,
        scratch: &mut BytesMut,
        nb_fragments: usize,
        last_fragment_size: usize,
        send_counter: &mut u32,
    ) {
        let inner = &self.0;
        let fragment_size = inner.config.fragment_size;

        for &(c, is_retransmit) in to_send {
            *send_counter += 1;

            let frag_len = if c + 1 == nb_fragments { last_fragment_size } else { fragment_size };
            let offset = c * fragment_size;

            header.fragment_number = c as u8;
            header.fragments_per_frame = nb_fragments as u8;

            scratch.clear();
            header.encode(scratch);
            scratch.extend_from_slice(&current.buffer[offset..offset + frag_len]);
            let wire_bytes: Bytes = scratch.clone().freeze();

            {
                let mut stats = inner.stats.lock().unwrap();
                stats.fragments_sent += 1;
                if is_retransmit {
                    stats.retransmissions += 1;
                }
            }

            let cb_sender = self.clone();
            let frame_number = current.frame_number;
            let on_complete = Box::new(move |status: SendStatus| {
                cb_sender.handle_send_complete(frame_number, c, status);
            });

            if let Err(err) = inner.manager.send(inner.data_buffer, &wire_bytes, on_complete) {
                tracing::warn!(frame_number, fragment = c, error = %err, "fragment send failed");
            }
        }
    }

    /// Completion callback for a single fragment send. Drops the result
    /// silently if the frame it was sent for has since been superseded —
    /// `to_send_bitmap`'s frame number no longer matches.
    fn handle_send_complete(&self, frame_number: u16, fragment: usize, status: SendStatus) {
        let mut send_state = self.0.send_state.lock().unwrap();
        if send_state.to_send_bitmap.frame_number != frame_number {
            return;
        }
        if status == SendStatus::Sent {
            send_state.to_send_bitmap.unset_flag(fragment);
        }
    }
}
