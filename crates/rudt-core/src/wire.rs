//! # Wire Format
//!
//! Packet header and message frame codecs.
//!
//! ## Packet Header (variable 1-22 bytes)
//!
//! ```text
//! +-+-+-+-+-+-+-+-+
//! |0|K|N|C|A|P|R|S|   flags, followed by one field per set bit in bit order
//! +-+-+-+-+-+-+-+-+
//!  S  sequence number        24 bit
//!  R  RTT request            (no field, the packet's sequence number is the probe)
//!  P  RTT response           24 bit sequence number + 8 bit delay (ms)
//!  A  arrival rate           f32, packets/sec
//!  C  link capacity          f32, packets/sec
//!  N  NAK                    24 bit sequence number
//!  K  ACK                    24 bit sequence number
//! ```
//!
//! ## Message Frame (6-8 bytes + payload)
//!
//! ```text
//! | flags u8 | channel u8 | payload length u16 | [ack u16] | sequence u16 | payload |
//! ```
//!
//! A packet body is a concatenation of message frames. All multi-byte
//! fields are big endian.

use bytes::{Buf, BufMut, Bytes};
use std::fmt;

use crate::seq::{MessageSeq, PacketSeq};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Largest RTT response delay that fits the 1-byte field (milliseconds).
pub const MAX_RESPONSE_DELAY: u8 = u8::MAX;

/// Header length with every flag set: 1 + 3 + 4 (response) + 4 + 4 + 3 + 3.
pub const MAX_PACKET_HEADER_LEN: usize = 22;

/// Message frame header without the optional ack field.
pub const MESSAGE_HEADER_LEN: usize = 6;

/// Size of the optional per-channel ack field.
pub const ACK_FIELD_LEN: usize = 2;

/// Largest payload a single frame can describe.
pub const MAX_MESSAGE_PAYLOAD: usize = u16::MAX as usize;

// ─── Header Flags ────────────────────────────────────────────────────────────

/// Packet header flag bits. Field order on the wire follows bit order.
pub mod header_flags {
    pub const SEQUENCE_NUMBER: u8 = 0x01;
    pub const RTT_REQUEST: u8 = 0x02;
    pub const RTT_RESPONSE: u8 = 0x04;
    pub const ARRIVAL_RATE: u8 = 0x08;
    pub const LINK_CAPACITY: u8 = 0x10;
    pub const NAK: u8 = 0x20;
    pub const ACK: u8 = 0x40;

    /// Every bit a decoder accepts.
    pub const ALL: u8 =
        SEQUENCE_NUMBER | RTT_REQUEST | RTT_RESPONSE | ARRIVAL_RATE | LINK_CAPACITY | NAK | ACK;
}

#[inline]
fn put_packet_seq(buf: &mut impl BufMut, sn: PacketSeq) {
    buf.put_uint(sn.value() as u64, 3);
}

#[inline]
fn get_packet_seq(buf: &mut impl Buf) -> Option<PacketSeq> {
    if buf.remaining() < 3 {
        return None;
    }
    Some(PacketSeq::new(buf.get_uint(3) as u32))
}

#[inline]
fn get_f32(buf: &mut impl Buf) -> Option<f32> {
    if buf.remaining() < 4 {
        return None;
    }
    Some(buf.get_f32())
}

// ─── Packet Header ──────────────────────────────────────────────────────────

/// RTT response carried in a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttResponse {
    /// Sequence number of the packet that carried the RTT request.
    pub sequence_number: PacketSeq,
    /// Time the request waited at the responder, in milliseconds.
    pub delay_ms: u8,
}

/// Decoded packet header. Each `Some` field sets its flag on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketHeader {
    pub sequence_number: Option<PacketSeq>,
    pub rtt_request: bool,
    pub rtt_response: Option<RttResponse>,
    /// Sender's data arrival rate estimate (packets/sec).
    pub arrival_rate: Option<f32>,
    /// Sender's link capacity estimate (packets/sec).
    pub link_capacity: Option<f32>,
    pub nak: Option<PacketSeq>,
    /// Newest packet sequence number the sender has seen.
    pub ack: Option<PacketSeq>,
}

impl PacketHeader {
    /// The flags byte describing which fields are present.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.sequence_number.is_some() {
            flags |= header_flags::SEQUENCE_NUMBER;
        }
        if self.rtt_request {
            flags |= header_flags::RTT_REQUEST;
        }
        if self.rtt_response.is_some() {
            flags |= header_flags::RTT_RESPONSE;
        }
        if self.arrival_rate.is_some() {
            flags |= header_flags::ARRIVAL_RATE;
        }
        if self.link_capacity.is_some() {
            flags |= header_flags::LINK_CAPACITY;
        }
        if self.nak.is_some() {
            flags |= header_flags::NAK;
        }
        if self.ack.is_some() {
            flags |= header_flags::ACK;
        }
        flags
    }

    /// Encode the header. Panics if `buf` runs out of space.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags());

        if let Some(sn) = self.sequence_number {
            put_packet_seq(buf, sn);
        }
        if let Some(resp) = self.rtt_response {
            put_packet_seq(buf, resp.sequence_number);
            buf.put_u8(resp.delay_ms);
        }
        if let Some(rate) = self.arrival_rate {
            buf.put_f32(rate);
        }
        if let Some(capacity) = self.link_capacity {
            buf.put_f32(capacity);
        }
        if let Some(nak) = self.nak {
            put_packet_seq(buf, nak);
        }
        if let Some(ack) = self.ack {
            put_packet_seq(buf, ack);
        }
    }

    /// Decode a header. Returns `None` on truncation or unknown flag bits.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }
        let flags = buf.get_u8();
        if flags & !header_flags::ALL != 0 {
            return None;
        }

        let mut header = PacketHeader::default();
        if flags & header_flags::SEQUENCE_NUMBER != 0 {
            header.sequence_number = Some(get_packet_seq(buf)?);
        }
        header.rtt_request = flags & header_flags::RTT_REQUEST != 0;
        if flags & header_flags::RTT_RESPONSE != 0 {
            let sequence_number = get_packet_seq(buf)?;
            if !buf.has_remaining() {
                return None;
            }
            header.rtt_response = Some(RttResponse {
                sequence_number,
                delay_ms: buf.get_u8(),
            });
        }
        if flags & header_flags::ARRIVAL_RATE != 0 {
            header.arrival_rate = Some(get_f32(buf)?);
        }
        if flags & header_flags::LINK_CAPACITY != 0 {
            header.link_capacity = Some(get_f32(buf)?);
        }
        if flags & header_flags::NAK != 0 {
            header.nak = Some(get_packet_seq(buf)?);
        }
        if flags & header_flags::ACK != 0 {
            header.ack = Some(get_packet_seq(buf)?);
        }
        Some(header)
    }

    /// Total encoded size of this header.
    pub fn encoded_len(&self) -> usize {
        1 + self.sequence_number.map_or(0, |_| 3)
            + self.rtt_response.map_or(0, |_| 4)
            + self.arrival_rate.map_or(0, |_| 4)
            + self.link_capacity.map_or(0, |_| 4)
            + self.nak.map_or(0, |_| 3)
            + self.ack.map_or(0, |_| 3)
    }
}

// ─── Message Flags ───────────────────────────────────────────────────────────

/// Per-message flag bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const NONE: MessageFlags = MessageFlags(0);
    /// Connection open.
    pub const SYN: MessageFlags = MessageFlags(0x01);
    /// Connection reset.
    pub const RST: MessageFlags = MessageFlags(0x02);
    /// Proxy / relay control.
    pub const PRX: MessageFlags = MessageFlags(0x04);
    /// The frame carries a per-channel ack field.
    pub const ACK: MessageFlags = MessageFlags(0x08);

    const CONTROL: u8 = 0x01 | 0x02 | 0x04;

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        MessageFlags(bits)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Connection-control class messages are never bundled with data.
    #[inline]
    pub const fn is_control(self) -> bool {
        self.0 & Self::CONTROL != 0
    }

    #[inline]
    pub const fn union(self, other: MessageFlags) -> Self {
        MessageFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn without(self, other: MessageFlags) -> Self {
        MessageFlags(self.0 & !other.0)
    }
}

impl std::ops::BitOr for MessageFlags {
    type Output = MessageFlags;

    fn bitor(self, rhs: MessageFlags) -> MessageFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (MessageFlags::SYN, "SYN"),
            (MessageFlags::RST, "RST"),
            (MessageFlags::PRX, "PRX"),
            (MessageFlags::ACK, "ACK"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        write!(f, "MessageFlags({})", names.join("|"))
    }
}

// ─── Message Frame ───────────────────────────────────────────────────────────

/// One message as laid out inside a packet body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    /// Message flags. The `ACK` bit is derived from `ack` when encoding.
    pub flags: MessageFlags,
    pub channel_qualifier: u8,
    /// Per-channel acknowledgment piggybacked on this frame.
    pub ack: Option<MessageSeq>,
    pub sequence_number: MessageSeq,
    pub data: Bytes,
}

impl MessageFrame {
    /// A zero-payload frame that only carries an ack for `channel_qualifier`.
    pub fn ack_only(channel_qualifier: u8, ack: MessageSeq) -> Self {
        MessageFrame {
            flags: MessageFlags::NONE,
            channel_qualifier,
            ack: Some(ack),
            sequence_number: MessageSeq::ZERO,
            data: Bytes::new(),
        }
    }

    /// Size of a frame carrying `payload_len` bytes.
    #[inline]
    pub const fn frame_len(payload_len: usize, has_ack: bool) -> usize {
        MESSAGE_HEADER_LEN + if has_ack { ACK_FIELD_LEN } else { 0 } + payload_len
    }

    pub fn encoded_len(&self) -> usize {
        Self::frame_len(self.data.len(), self.ack.is_some())
    }

    /// Encode the frame. Panics if `buf` runs out of space or the payload
    /// exceeds [`MAX_MESSAGE_PAYLOAD`].
    pub fn encode(&self, buf: &mut impl BufMut) {
        assert!(
            self.data.len() <= MAX_MESSAGE_PAYLOAD,
            "message payload of {} bytes exceeds frame limit",
            self.data.len()
        );
        let mut flags = self.flags.without(MessageFlags::ACK);
        if self.ack.is_some() {
            flags = flags | MessageFlags::ACK;
        }
        buf.put_u8(flags.bits());
        buf.put_u8(self.channel_qualifier);
        buf.put_u16(self.data.len() as u16);
        if let Some(ack) = self.ack {
            buf.put_u16(ack.value() as u16);
        }
        buf.put_u16(self.sequence_number.value() as u16);
        buf.put_slice(&self.data);
    }

    /// Decode one frame from the front of `buf`.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.remaining() < MESSAGE_HEADER_LEN {
            return None;
        }
        let flags = MessageFlags::from_bits(buf.get_u8());
        let channel_qualifier = buf.get_u8();
        let len = buf.get_u16() as usize;
        let ack = if flags.contains(MessageFlags::ACK) {
            if buf.remaining() < ACK_FIELD_LEN {
                return None;
            }
            Some(MessageSeq::new(buf.get_u16() as u32))
        } else {
            None
        };
        if buf.remaining() < 2 {
            return None;
        }
        let sequence_number = MessageSeq::new(buf.get_u16() as u32);
        if buf.remaining() < len {
            return None;
        }
        let data = buf.split_to(len);
        Some(MessageFrame {
            flags: flags.without(MessageFlags::ACK),
            channel_qualifier,
            ack,
            sequence_number,
            data,
        })
    }

    /// Decode every frame in a packet body. `None` if any frame is malformed.
    pub fn decode_all(mut body: Bytes) -> Option<Vec<Self>> {
        let mut frames = Vec::new();
        while body.has_remaining() {
            frames.push(Self::decode(&mut body)?);
        }
        Some(frames)
    }
}

// ─── Full Packet ─────────────────────────────────────────────────────────────

/// A decoded datagram: header plus the message frames that follow it.
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub frames: Vec<MessageFrame>,
}

impl Packet {
    /// Decode a complete datagram.
    pub fn decode(mut data: Bytes) -> Option<Self> {
        let header = PacketHeader::decode(&mut data)?;
        let frames = MessageFrame::decode_all(data)?;
        Some(Packet { header, frames })
    }
}
