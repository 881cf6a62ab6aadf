//! # Outgoing Messages
//!
//! Application payloads queued for transmission. A message is shared as
//! `Arc<Message>`: the reliability layer keeps its own handle for
//! retransmission while the [`SendQueue`](crate::send_queue::SendQueue)
//! holds one until the message has been copied into a packet.

use bytes::Bytes;

use crate::seq::MessageSeq;
use crate::wire::{MessageFlags, MessageFrame};

// ─── Priority ────────────────────────────────────────────────────────────────

/// Delivery priority class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Bypasses buffering entirely.
    Immediate = 0,
    /// Buffered and flushed on the next tick. The only class the send
    /// queue packetizes.
    #[default]
    High = 1,
    Medium = 2,
    Low = 3,
}

// ─── Message ─────────────────────────────────────────────────────────────────

/// A single outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel_qualifier: u8,
    pub sequence_number: MessageSeq,
    pub priority: Priority,
    pub flags: MessageFlags,
    pub data: Bytes,
}

impl Message {
    /// A high-priority data message.
    pub fn data(channel_qualifier: u8, sequence_number: MessageSeq, data: Bytes) -> Self {
        Message {
            channel_qualifier,
            sequence_number,
            priority: Priority::High,
            flags: MessageFlags::NONE,
            data,
        }
    }

    /// A connection-control message (SYN, RST or PRX).
    pub fn control(flags: MessageFlags, sequence_number: MessageSeq, data: Bytes) -> Self {
        debug_assert!(flags.is_control(), "control message without control flag");
        Message {
            channel_qualifier: 0,
            sequence_number,
            priority: Priority::Immediate,
            flags,
            data,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this message must travel alone, outside the tick cycle.
    #[inline]
    pub fn is_control(&self) -> bool {
        self.flags.is_control()
    }

    /// Upper bound on the bytes this message occupies in a packet,
    /// counting room for a piggybacked ack.
    #[inline]
    pub fn approximate_size(&self) -> usize {
        MessageFrame::frame_len(self.data.len(), true)
    }

    /// Wire frame for this message, optionally carrying an ack.
    pub fn to_frame(&self, ack: Option<MessageSeq>) -> MessageFrame {
        MessageFrame {
            flags: self.flags,
            channel_qualifier: self.channel_qualifier,
            ack,
            sequence_number: self.sequence_number,
            data: self.data.clone(),
        }
    }
}
