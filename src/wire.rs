//! On-wire layout for fragment data headers and ack packets, and the
//! protocol constants that size them.
//!
//! Both structures are fixed-width and travel in network byte order;
//! everything else in the crate deals in host order.

use bytes::{Buf, BufMut, BytesMut};

/// Maximum payload carried per fragment, chosen to stay well under a
/// typical path MTU once the fragment header and any transport overhead
/// are added.
pub const FRAGMENT_SIZE: usize = 1000;

/// A frame may never fragment into more pieces than an ack bitmap can
/// track (two `u64` words).
pub const MAX_FRAGMENTS_PER_FRAME: usize = 128;

/// Largest frame the sender will accept without returning `FrameTooLarge`.
pub const MAX_FRAME_SIZE: usize = MAX_FRAGMENTS_PER_FRAME * FRAGMENT_SIZE;

/// Default one-way latency assumed before the network manager has a
/// measurement of its own.
pub const DEFAULT_ESTIMATED_LATENCY_MS: u32 = 100;

/// Slack added on top of the estimated latency before clamping.
pub const RETRY_SLACK_MS: u32 = 5;

/// Lower bound on the retry/dequeue wait, regardless of measured latency.
pub const MIN_RETRY_MS: u32 = 15;

/// Upper bound on the retry/dequeue wait, regardless of measured latency.
pub const MAX_RETRY_MS: u32 = 50;

/// Number of trailing frames over which the efficiency ratio is averaged.
pub const EFFICIENCY_RING: usize = 15;

/// Wait, in milliseconds, used by the queue when retries are disabled —
/// effectively "block until signalled".
pub const RETRIES_DISABLED_WAIT_MS: u32 = 100_000;

/// Bit 0 of a fragment header's flag byte marks the frame as high
/// priority / flush-preempting.
const FLUSH_FRAME_BIT: u8 = 0b0000_0001;

/// Per-fragment header prefixed to every data-buffer send.
///
/// Wire layout (5 bytes, network byte order):
///
/// ```text
/// 0       2  3           4                    5
/// | frame_number | flags | fragment_number | fragments_per_frame |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_number: u16,
    pub flush: bool,
    pub fragment_number: u8,
    pub fragments_per_frame: u8,
}

impl FragmentHeader {
    pub const ENCODED_LEN: usize = 5;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.frame_number);
        buf.put_u8(if self.flush { FLUSH_FRAME_BIT } else { 0 });
        buf.put_u8(self.fragment_number);
        buf.put_u8(self.fragments_per_frame);
    }

    /// Returns `None` on truncated input; never panics.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        let frame_number = buf.get_u16();
        let flags = buf.get_u8();
        let fragment_number = buf.get_u8();
        let fragments_per_frame = buf.get_u8();
        Some(Self {
            frame_number,
            flush: flags & FLUSH_FRAME_BIT != 0,
            fragment_number,
            fragments_per_frame,
        })
    }
}

/// Ack packet read from the ack buffer.
///
/// Wire layout (18 bytes, network byte order):
///
/// ```text
/// 0       2                10                  18
/// | frame_number | high_packets_ack | low_packets_ack |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckWirePacket {
    pub frame_number: u16,
    pub high_packets_ack: u64,
    pub low_packets_ack: u64,
}

impl AckWirePacket {
    pub const ENCODED_LEN: usize = 2 + 8 + 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.frame_number);
        buf.put_u64(self.high_packets_ack);
        buf.put_u64(self.low_packets_ack);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            frame_number: buf.get_u16(),
            high_packets_ack: buf.get_u64(),
            low_packets_ack: buf.get_u64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_header_round_trip() {
        let header = FragmentHeader {
            frame_number: 4242,
            flush: true,
            fragment_number: 17,
            fragments_per_frame: 64,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), FragmentHeader::ENCODED_LEN);

        let mut cursor = &buf[..];
        let decoded = FragmentHeader::decode(&mut cursor).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn fragment_header_decode_rejects_truncated_input() {
        let mut cursor = &[0u8, 1, 2][..];
        assert!(FragmentHeader::decode(&mut cursor).is_none());
    }

    #[test]
    fn ack_packet_round_trip() {
        let pkt = AckWirePacket {
            frame_number: 7,
            high_packets_ack: 0xdead_beef_0000_0001,
            low_packets_ack: u64::MAX,
        };
        let mut buf = BytesMut::new();
        pkt.encode(&mut buf);
        assert_eq!(buf.len(), AckWirePacket::ENCODED_LEN);

        let mut cursor = &buf[..];
        assert_eq!(AckWirePacket::decode(&mut cursor).unwrap(), pkt);
    }

    #[test]
    fn ack_packet_decode_rejects_truncated_input() {
        let mut cursor = &[0u8; 17][..];
        assert!(AckWirePacket::decode(&mut cursor).is_none());
    }
}
