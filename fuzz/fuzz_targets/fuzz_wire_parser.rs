#![no_main]

use libfuzzer_sys::fuzz_target;

use fragstream_sender::wire::{AckWirePacket, FragmentHeader};

/// Fuzz the wire decoders the ack loop and (indirectly, via the peer)
/// fragment headers travel through.
///
/// Neither decoder may panic on any input — only return `None` for
/// truncated or otherwise invalid bytes.
fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    if let Some(header) = FragmentHeader::decode(&mut cursor) {
        let mut buf = bytes::BytesMut::new();
        header.encode(&mut buf);
        let mut re_cursor = &buf[..];
        let re_decoded = FragmentHeader::decode(&mut re_cursor).expect("re-encoded header must decode");
        assert_eq!(re_decoded, header);
    }

    let mut cursor = data;
    if let Some(pkt) = AckWirePacket::decode(&mut cursor) {
        let mut buf = bytes::BytesMut::new();
        pkt.encode(&mut buf);
        let mut re_cursor = &buf[..];
        let re_decoded = AckWirePacket::decode(&mut re_cursor).expect("re-encoded ack packet must decode");
        assert_eq!(re_decoded, pkt);
    }
});
