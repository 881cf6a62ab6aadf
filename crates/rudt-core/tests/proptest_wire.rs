//! Property-based tests for the wire format.
//!
//! Decoders must reject malformed input without panicking, and any header
//! the encoder can produce must decode to itself.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rudt_core::seq::{MessageSeq, PacketSeq};
use rudt_core::wire::*;

fn packet_seq() -> impl Strategy<Value = PacketSeq> {
    (0..=PacketSeq::MASK).prop_map(PacketSeq::new)
}

/// Finite rates; NaN never compares equal after a roundtrip.
fn rate() -> impl Strategy<Value = f32> {
    prop_oneof![Just(0.0f32), 0.0f32..1.0e7]
}

fn packet_header() -> impl Strategy<Value = PacketHeader> {
    (
        proptest::option::of(packet_seq()),
        any::<bool>(),
        proptest::option::of((packet_seq(), any::<u8>())),
        proptest::option::of(rate()),
        proptest::option::of(rate()),
        proptest::option::of(packet_seq()),
        proptest::option::of(packet_seq()),
    )
        .prop_map(
            |(sequence_number, rtt_request, response, arrival_rate, link_capacity, nak, ack)| {
                PacketHeader {
                    sequence_number,
                    rtt_request,
                    rtt_response: response.map(|(sequence_number, delay_ms)| RttResponse {
                        sequence_number,
                        delay_ms,
                    }),
                    arrival_rate,
                    link_capacity,
                    nak,
                    ack,
                }
            },
        )
}

proptest! {
    #[test]
    fn header_roundtrip(hdr in packet_header()) {
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        prop_assert_eq!(buf.len(), hdr.encoded_len());
        prop_assert!(buf.len() <= MAX_PACKET_HEADER_LEN);
        prop_assert_eq!(buf[0], hdr.flags());

        let decoded = PacketHeader::decode(&mut buf.freeze()).unwrap();
        prop_assert_eq!(decoded, hdr);
    }

    #[test]
    fn packet_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Packet::decode(Bytes::from(data));
    }

    #[test]
    fn frame_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut buf = Bytes::from(data);
        while MessageFrame::decode(&mut buf).is_some() {}
    }

    #[test]
    fn frames_concatenate(
        frames in prop::collection::vec(
            (any::<u8>(), proptest::option::of(any::<u16>()), any::<u16>(),
             prop::collection::vec(any::<u8>(), 0..64)),
            1..8,
        )
    ) {
        let frames: Vec<MessageFrame> = frames
            .into_iter()
            .map(|(cq, ack, sn, data)| MessageFrame {
                flags: MessageFlags::NONE,
                channel_qualifier: cq,
                ack: ack.map(|a| MessageSeq::new(a as u32)),
                sequence_number: MessageSeq::new(sn as u32),
                data: Bytes::from(data),
            })
            .collect();

        let mut buf = BytesMut::new();
        for frame in &frames {
            frame.encode(&mut buf);
        }
        let expected_len: usize = frames.iter().map(MessageFrame::encoded_len).sum();
        prop_assert_eq!(buf.len(), expected_len);
        prop_assert_eq!(MessageFrame::decode_all(buf.freeze()), Some(frames));
    }
}
