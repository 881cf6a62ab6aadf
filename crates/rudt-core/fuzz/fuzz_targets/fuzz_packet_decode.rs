#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rudt_core::wire::{MessageFrame, Packet, PacketHeader};

/// Fuzz the datagram decode pipeline.
///
/// Decoders must return `None` for malformed input, never panic.
fuzz_target!(|data: &[u8]| {
    let _ = Packet::decode(Bytes::copy_from_slice(data));

    let mut buf = data;
    let _ = PacketHeader::decode(&mut buf);

    let _ = MessageFrame::decode_all(Bytes::copy_from_slice(data));
});
