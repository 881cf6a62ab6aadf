//! # Send Queue
//!
//! Outbound packetizer. Pure logic: the only I/O is the synchronous
//! [`Connection::send_datagram`] call made while a packet is assembled.
//!
//! ## Responsibilities
//!
//! 1. **Buffering**: high-priority messages are held until the next tick, or
//!    flushed early when the next one would push the packet past the MTU
//! 2. **Control bypass**: SYN / RST / PRX messages go out immediately, alone
//! 3. **Ack piggybacking**: at most one per-channel ack per packet, attached
//!    to a message of that channel or appended as an ack-only frame
//! 4. **Header feedback**: RTT probes with bandwidth estimates, RTT
//!    responses, NAKs and packet acks ride on packets sent anyway
//! 5. **Liveness**: a header-only heartbeat when nothing else went out
//!
//! ## Packet layout
//!
//! ```text
//! ┌──────────────┬───────────────────┬─────────────┬─────┬────────────────┐
//! │ PacketHeader │ frame (msg + ack) │ frame (msg) │ ... │ ack-only frame │
//! └──────────────┴───────────────────┴─────────────┴─────┴────────────────┘
//!   ≤ 22 bytes     buffered messages in enqueue order        unattached acks
//! ```

use quanta::Instant;
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::MIN_MTU;
use crate::congestion::CongestionControl;
use crate::conn_time::RttClock;
use crate::estimator::BandwidthEstimator;
use crate::message::{Message, Priority};
use crate::seq::{MessageSeq, PacketSeq};
use crate::stats::SendQueueStats;
use crate::wire::{
    MessageFrame, PacketHeader, RttResponse, MAX_PACKET_HEADER_LEN, MAX_RESPONSE_DELAY,
};

/// The datagram sink a send queue writes to.
pub trait Connection {
    /// Fire-and-forget transmission of one datagram.
    fn send_datagram(&mut self, data: &[u8]);

    fn is_open(&self) -> bool;

    /// Largest datagram this connection accepts.
    fn mtu(&self) -> usize;
}

/// Outbound packetizer for one connection.
pub struct SendQueue<C: Connection> {
    connection: C,
    /// Scratch packet buffer, `mtu` bytes, reused across ticks.
    buf: Vec<u8>,
    next_sn: PacketSeq,

    // ─── Buffered content ───
    messages: Vec<Arc<Message>>,
    /// Sum of `approximate_size` over `messages`.
    buffered_size: usize,
    acks: BTreeMap<u8, MessageSeq>,
    /// Channels that already had an ack attached during the current tick.
    acks_sent: BTreeSet<u8>,

    // ─── Header obligations ───
    rtt_response: Option<(PacketSeq, Instant)>,
    nak: Option<PacketSeq>,
    packet_ack: Option<PacketSeq>,
    heartbeat: bool,

    stats: SendQueueStats,
}

impl<C: Connection> SendQueue<C> {
    /// Queue with a randomly chosen initial packet sequence number.
    pub fn new(connection: C) -> Self {
        Self::with_rng(connection, StdRng::seed_from_u64(rand::rng().random()))
    }

    /// Queue whose initial packet sequence number is drawn from `rng`.
    pub fn with_rng(connection: C, mut rng: StdRng) -> Self {
        let initial = PacketSeq::new(rng.random::<u32>());
        Self::with_initial_sequence(connection, initial)
    }

    /// Queue starting at a fixed packet sequence number.
    ///
    /// # Panics
    ///
    /// If the connection's MTU is below [`MIN_MTU`].
    pub fn with_initial_sequence(connection: C, initial: PacketSeq) -> Self {
        let mtu = connection.mtu();
        assert!(mtu >= MIN_MTU, "mtu {mtu} is below the minimum of {MIN_MTU}");

        SendQueue {
            connection,
            buf: vec![0u8; mtu],
            next_sn: initial,
            messages: Vec::new(),
            buffered_size: 0,
            acks: BTreeMap::new(),
            acks_sent: BTreeSet::new(),
            rtt_response: None,
            nak: None,
            packet_ack: None,
            heartbeat: false,
            stats: SendQueueStats::new(),
        }
    }

    // ─── Enqueue ────────────────────────────────────────────────────────

    /// Queue a message for the next tick.
    ///
    /// Connection-control messages are sent at once in a packet of their
    /// own. Other messages are buffered; if the buffer would reach the
    /// packet budget, the buffered messages are flushed first.
    ///
    /// # Panics
    ///
    /// If a buffered message is not [`Priority::High`] or does not fit in a
    /// packet on its own.
    pub fn enqueue_message<L, A>(
        &mut self,
        message: Arc<Message>,
        cc: &mut CongestionControl<L, A>,
        conn_time: &mut impl RttClock,
        now: Instant,
    ) where
        L: BandwidthEstimator,
        A: BandwidthEstimator,
    {
        if message.is_control() {
            self.send_control(&message);
            return;
        }

        assert_eq!(
            message.priority,
            Priority::High,
            "only high priority messages can be buffered"
        );

        let size = message.approximate_size();
        let budget = self.buffer_budget();
        assert!(
            size <= budget,
            "message of {size} bytes exceeds the packet budget of {budget}"
        );

        if !self.messages.is_empty() && self.buffered_size + size >= budget {
            tracing::debug!(
                buffered = self.buffered_size,
                messages = self.messages.len(),
                incoming = size,
                "send buffer full, flushing early"
            );
            self.stats.overflow_flushes += 1;
            self.flush(cc, conn_time, now);
        }

        self.buffered_size += size;
        self.messages.push(message);
    }

    /// Request an ack of `sequence_number` on `channel_qualifier`. A pending
    /// ack for the channel is only ever moved forward.
    ///
    /// Returns whether any ack is pending.
    pub fn enqueue_ack(&mut self, channel_qualifier: u8, sequence_number: MessageSeq) -> bool {
        self.acks
            .entry(channel_qualifier)
            .and_modify(|pending| *pending = pending.cyclic_max(sequence_number))
            .or_insert(sequence_number);
        !self.acks.is_empty()
    }

    /// Answer the RTT request carried by packet `sequence_number`, received
    /// at `now`. Replaces an unanswered earlier request.
    pub fn enqueue_rtt_response(&mut self, sequence_number: PacketSeq, now: Instant) {
        self.rtt_response = Some((sequence_number, now));
    }

    /// Report a loss on the next outgoing header.
    pub fn enqueue_nak(&mut self, nak: PacketSeq) {
        self.nak = Some(nak);
    }

    /// Send a header-only packet this tick if nothing else goes out.
    pub fn enqueue_heartbeat(&mut self) {
        self.heartbeat = true;
    }

    // ─── Tick ───────────────────────────────────────────────────────────

    /// Start a new tick and flush. Returns whether a packet was sent.
    pub fn tick<L, A>(
        &mut self,
        cc: &mut CongestionControl<L, A>,
        conn_time: &mut impl RttClock,
        now: Instant,
    ) -> bool
    where
        L: BandwidthEstimator,
        A: BandwidthEstimator,
    {
        self.acks_sent.clear();
        if let Some(ack) = cc.ack() {
            self.packet_ack = Some(ack);
        }
        self.flush(cc, conn_time, now)
    }

    fn flush<L, A>(
        &mut self,
        cc: &mut CongestionControl<L, A>,
        conn_time: &mut impl RttClock,
        now: Instant,
    ) -> bool
    where
        L: BandwidthEstimator,
        A: BandwidthEstimator,
    {
        let mut sent = false;

        if self.has_content() {
            let header = self.fill_header(cc, conn_time, now);
            let mtu = self.buf.len();
            let mut cursor = &mut self.buf[..];
            header.encode(&mut cursor);
            let header_len = mtu - cursor.len();

            for message in &self.messages {
                let cq = message.channel_qualifier;
                let ack = if self.acks_sent.contains(&cq) {
                    None
                } else {
                    self.acks.remove(&cq)
                };
                if ack.is_some() {
                    self.acks_sent.insert(cq);
                }
                message.to_frame(ack).encode(&mut cursor);
                self.stats.messages_sent += 1;
            }

            let acks_sent = &mut self.acks_sent;
            let stats = &mut self.stats;
            self.acks.retain(|&cq, &mut ack| {
                if acks_sent.contains(&cq) {
                    return true;
                }
                let frame = MessageFrame::ack_only(cq, ack);
                if frame.encoded_len() > cursor.len() {
                    tracing::warn!(channel = cq, %ack, "no room for ack, deferring to next packet");
                    return true;
                }
                frame.encode(&mut cursor);
                acks_sent.insert(cq);
                stats.standalone_acks_sent += 1;
                false
            });

            let len = mtu - cursor.len();
            if len != header_len {
                let carries_data = !self.messages.is_empty();
                self.transmit(len, &header, carries_data, cc);
                sent = true;
            }
        }

        if !sent && self.heartbeat {
            sent = self.send_heartbeat(cc, conn_time, now);
        }

        self.messages.clear();
        self.buffered_size = 0;
        self.heartbeat = false;
        sent
    }

    // ─── Packet Assembly ────────────────────────────────────────────────

    /// Bytes available to buffered frames once a full header is reserved.
    fn buffer_budget(&self) -> usize {
        self.buf.len() - MAX_PACKET_HEADER_LEN
    }

    fn has_content(&self) -> bool {
        !self.messages.is_empty() || self.acks.keys().any(|cq| !self.acks_sent.contains(cq))
    }

    /// Header for the next sequenced packet. Consumes the sequence number
    /// and every pending header obligation.
    fn fill_header<L, A>(
        &mut self,
        cc: &CongestionControl<L, A>,
        conn_time: &mut impl RttClock,
        now: Instant,
    ) -> PacketHeader
    where
        L: BandwidthEstimator,
        A: BandwidthEstimator,
    {
        let sequence_number = self.next_sn;
        self.next_sn = self.next_sn.next();

        let mut header = PacketHeader {
            sequence_number: Some(sequence_number),
            ..Default::default()
        };

        // Probes only ride on packets that are sent anyway.
        if conn_time.rtt_request(now, sequence_number) {
            header.rtt_request = true;
            header.arrival_rate = Some(cc.data_arrival_rate());
            header.link_capacity = Some(cc.link_capacity());
        }

        if let Some((sn, registered)) = self.rtt_response.take() {
            let waited = now.saturating_duration_since(registered).as_millis();
            header.rtt_response = Some(RttResponse {
                sequence_number: sn,
                delay_ms: waited.min(MAX_RESPONSE_DELAY as u128) as u8,
            });
        }

        header.nak = self.nak.take();
        header.ack = self.packet_ack.take();
        header
    }

    /// Hand the first `len` bytes of the scratch buffer to the connection.
    /// Only packets with message payload feed the slow-start size average.
    fn transmit<L, A>(
        &mut self,
        len: usize,
        header: &PacketHeader,
        carries_data: bool,
        cc: &mut CongestionControl<L, A>,
    ) where
        L: BandwidthEstimator,
        A: BandwidthEstimator,
    {
        self.connection.send_datagram(&self.buf[..len]);
        self.stats.record_packet(len);
        match header.sequence_number {
            Some(sn) if carries_data => cc.on_data_sent(sn, len),
            Some(sn) => cc.on_packet_sent(sn),
            None => {}
        }
        tracing::trace!(
            sn = ?header.sequence_number,
            len,
            flags = header.flags(),
            "packet sent"
        );
    }

    fn send_heartbeat<L, A>(
        &mut self,
        cc: &mut CongestionControl<L, A>,
        conn_time: &mut impl RttClock,
        now: Instant,
    ) -> bool
    where
        L: BandwidthEstimator,
        A: BandwidthEstimator,
    {
        if !self.connection.is_open() {
            tracing::trace!("connection closed, heartbeat skipped");
            return false;
        }

        let header = self.fill_header(cc, conn_time, now);
        let mtu = self.buf.len();
        let mut cursor = &mut self.buf[..];
        header.encode(&mut cursor);
        let len = mtu - cursor.len();

        self.transmit(len, &header, false, cc);
        self.stats.heartbeats_sent += 1;
        true
    }

    /// Control messages travel alone behind an empty header.
    fn send_control(&mut self, message: &Message) {
        let mtu = self.buf.len();
        let mut cursor = &mut self.buf[..];
        PacketHeader::default().encode(&mut cursor);
        message.to_frame(None).encode(&mut cursor);
        let len = mtu - cursor.len();

        self.connection.send_datagram(&self.buf[..len]);
        self.stats.record_packet(len);
        self.stats.control_packets_sent += 1;
        tracing::debug!(flags = ?message.flags, len, "control message sent");
    }

    // ─── Getters ────────────────────────────────────────────────────────

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn stats(&self) -> &SendQueueStats {
        &self.stats
    }

    /// Messages waiting for the next flush.
    pub fn buffered_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn buffered_size(&self) -> usize {
        self.buffered_size
    }

    pub fn pending_ack(&self, channel_qualifier: u8) -> Option<MessageSeq> {
        self.acks.get(&channel_qualifier).copied()
    }

    /// Sequence number the next sequenced packet will carry.
    pub fn next_sequence_number(&self) -> PacketSeq {
        self.next_sn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::congestion::INITIAL_PACKET_SIZE;
    use crate::conn_time::ConnTime;
    use crate::wire::{MessageFlags, Packet};
    use bytes::Bytes;
    use std::time::Duration;

    struct MockConnection {
        datagrams: Vec<Vec<u8>>,
        open: bool,
        mtu: usize,
    }

    impl MockConnection {
        fn new(mtu: usize) -> Self {
            MockConnection {
                datagrams: Vec::new(),
                open: true,
                mtu,
            }
        }
    }

    impl Connection for MockConnection {
        fn send_datagram(&mut self, data: &[u8]) {
            assert!(data.len() <= self.mtu, "datagram exceeds mtu");
            self.datagrams.push(data.to_vec());
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn mtu(&self) -> usize {
            self.mtu
        }
    }

    /// Never asks for RTT probes.
    struct NoProbe;

    impl RttClock for NoProbe {
        fn rtt_request(&mut self, _now: Instant, _sn: PacketSeq) -> bool {
            false
        }
    }

    fn queue() -> SendQueue<MockConnection> {
        SendQueue::with_initial_sequence(MockConnection::new(1400), PacketSeq::new(100))
    }

    fn cc() -> CongestionControl {
        CongestionControl::with_rng(StdRng::seed_from_u64(3))
    }

    fn msg(cq: u8, sn: u32, payload: &'static [u8]) -> Arc<Message> {
        Arc::new(Message::data(cq, MessageSeq::new(sn), Bytes::from_static(payload)))
    }

    fn sent(q: &SendQueue<MockConnection>) -> Vec<Packet> {
        q.connection()
            .datagrams
            .iter()
            .map(|d| Packet::decode(Bytes::copy_from_slice(d)).expect("valid packet"))
            .collect()
    }

    #[test]
    fn ack_merge_never_regresses() {
        let mut q = queue();
        assert!(q.enqueue_ack(1, MessageSeq::new(10)));
        q.enqueue_ack(1, MessageSeq::new(8));
        assert_eq!(q.pending_ack(1), Some(MessageSeq::new(10)));
        q.enqueue_ack(1, MessageSeq::new(12));
        assert_eq!(q.pending_ack(1), Some(MessageSeq::new(12)));
    }

    #[test]
    fn ack_merge_across_wraparound() {
        let mut q = queue();
        q.enqueue_ack(3, MessageSeq::new(0xFFFE));
        q.enqueue_ack(3, MessageSeq::new(1));
        q.enqueue_ack(3, MessageSeq::new(0xFFFF));
        assert_eq!(q.pending_ack(3), Some(MessageSeq::new(1)));
    }

    #[test]
    fn sequence_numbers_increase_per_packet() {
        let (mut q, mut cc) = (queue(), cc());
        let now = Instant::now();
        for i in 0..3 {
            q.enqueue_message(msg(0, i, b"x"), &mut cc, &mut NoProbe, now);
            q.tick(&mut cc, &mut NoProbe, now);
        }
        let sns: Vec<_> = sent(&q)
            .iter()
            .map(|p| p.header.sequence_number.unwrap().value())
            .collect();
        assert_eq!(sns, vec![100, 101, 102]);
        assert_eq!(cc.newest_sent_sn(), Some(PacketSeq::new(102)));
    }

    #[test]
    fn sequence_wraps_at_24_bits() {
        let mut q = SendQueue::with_initial_sequence(
            MockConnection::new(1400),
            PacketSeq::new(PacketSeq::MASK),
        );
        let mut cc = cc();
        let now = Instant::now();
        for _ in 0..2 {
            q.enqueue_heartbeat();
            q.tick(&mut cc, &mut NoProbe, now);
        }
        let packets = sent(&q);
        assert_eq!(packets[0].header.sequence_number, Some(PacketSeq::new(PacketSeq::MASK)));
        assert_eq!(packets[1].header.sequence_number, Some(PacketSeq::ZERO));
    }

    #[test]
    fn empty_tick_sends_nothing() {
        let (mut q, mut cc) = (queue(), cc());
        assert!(!q.tick(&mut cc, &mut NoProbe, Instant::now()));
        assert!(q.connection().datagrams.is_empty());
        // No sequence number consumed.
        assert_eq!(q.next_sequence_number(), PacketSeq::new(100));
    }

    #[test]
    fn nak_and_rtt_response_wait_for_a_packet() {
        let (mut q, mut cc) = (queue(), cc());
        let t0 = Instant::now();
        q.enqueue_nak(PacketSeq::new(55));
        q.enqueue_rtt_response(PacketSeq::new(77), t0);
        assert!(!q.tick(&mut cc, &mut NoProbe, t0));

        q.enqueue_message(msg(1, 0, b"data"), &mut cc, &mut NoProbe, t0);
        q.tick(&mut cc, &mut NoProbe, t0 + Duration::from_micros(12_700));
        q.enqueue_message(msg(1, 1, b"data"), &mut cc, &mut NoProbe, t0);
        q.tick(&mut cc, &mut NoProbe, t0);

        let packets = sent(&q);
        assert_eq!(packets[0].header.nak, Some(PacketSeq::new(55)));
        assert_eq!(
            packets[0].header.rtt_response,
            Some(RttResponse {
                sequence_number: PacketSeq::new(77),
                delay_ms: 12,
            })
        );
        // Both obligations are one-shot.
        assert_eq!(packets[1].header.nak, None);
        assert_eq!(packets[1].header.rtt_response, None);
    }

    #[test]
    fn rtt_response_delay_clamped() {
        let (mut q, mut cc) = (queue(), cc());
        let t0 = Instant::now();
        q.enqueue_rtt_response(PacketSeq::new(1), t0);
        q.enqueue_heartbeat();
        q.tick(&mut cc, &mut NoProbe, t0 + Duration::from_secs(3));
        let resp = sent(&q)[0].header.rtt_response.unwrap();
        assert_eq!(resp.delay_ms, MAX_RESPONSE_DELAY);
    }

    #[test]
    fn rtt_probe_carries_estimates() {
        let (mut q, mut cc) = (queue(), cc());
        let mut conn_time = ConnTime::new(&TransportConfig::default());
        let now = Instant::now();
        q.enqueue_message(msg(0, 0, b"probe"), &mut cc, &mut conn_time, now);
        q.tick(&mut cc, &mut conn_time, now);

        let hdr = &sent(&q)[0].header;
        assert!(hdr.rtt_request);
        assert_eq!(hdr.arrival_rate, Some(0.0));
        assert_eq!(hdr.link_capacity, Some(0.0));
        assert!(conn_time.has_outstanding_request());
    }

    #[test]
    fn packet_ack_piggybacks_only() {
        let (mut q, mut cc) = (queue(), cc());
        let now = Instant::now();
        let inbound = PacketHeader {
            sequence_number: Some(PacketSeq::new(900)),
            ..Default::default()
        };
        cc.got_packet(now, Duration::from_millis(20), PacketSeq::new(0), &inbound, 50);

        // A novel packet ack alone does not trigger a send.
        assert!(!q.tick(&mut cc, &mut NoProbe, now));

        q.enqueue_heartbeat();
        assert!(q.tick(&mut cc, &mut NoProbe, now));
        assert_eq!(sent(&q)[0].header.ack, Some(PacketSeq::new(900)));
    }

    #[test]
    fn control_message_bypasses_buffer() {
        let (mut q, mut cc) = (queue(), cc());
        let now = Instant::now();
        q.enqueue_message(msg(4, 0, b"queued"), &mut cc, &mut NoProbe, now);
        let syn = Message::control(MessageFlags::SYN, MessageSeq::new(9), Bytes::from_static(b"hi"));
        q.enqueue_message(Arc::new(syn), &mut cc, &mut NoProbe, now);

        let packets = sent(&q);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header, PacketHeader::default());
        assert_eq!(packets[0].frames.len(), 1);
        assert_eq!(packets[0].frames[0].flags, MessageFlags::SYN);
        assert_eq!(q.buffered_messages(), 1);
        assert_eq!(q.stats().control_packets_sent, 1);
        // Control packets are unsequenced.
        assert_eq!(q.next_sequence_number(), PacketSeq::new(100));
    }

    #[test]
    #[should_panic(expected = "only high priority")]
    fn low_priority_message_panics() {
        let (mut q, mut cc) = (queue(), cc());
        let low = Message::data(0, MessageSeq::ZERO, Bytes::new()).with_priority(Priority::Low);
        q.enqueue_message(Arc::new(low), &mut cc, &mut NoProbe, Instant::now());
    }

    #[test]
    #[should_panic(expected = "exceeds the packet budget")]
    fn oversized_message_panics() {
        let (mut q, mut cc) = (queue(), cc());
        let big = Message::data(0, MessageSeq::ZERO, Bytes::from(vec![0u8; 1400]));
        q.enqueue_message(Arc::new(big), &mut cc, &mut NoProbe, Instant::now());
    }

    #[test]
    #[should_panic(expected = "below the minimum")]
    fn tiny_mtu_panics() {
        let _ = SendQueue::new(MockConnection::new(16));
    }

    #[test]
    fn second_message_on_channel_gets_no_ack() {
        let (mut q, mut cc) = (queue(), cc());
        let now = Instant::now();
        q.enqueue_ack(2, MessageSeq::new(40));
        q.enqueue_message(msg(2, 0, b"a"), &mut cc, &mut NoProbe, now);
        q.enqueue_message(msg(2, 1, b"b"), &mut cc, &mut NoProbe, now);
        q.tick(&mut cc, &mut NoProbe, now);

        let frames = &sent(&q)[0].frames;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].ack, Some(MessageSeq::new(40)));
        assert_eq!(frames[1].ack, None);
        assert_eq!(q.pending_ack(2), None);
    }

    #[test]
    fn ack_after_overflow_flush_rolls_to_next_tick() {
        let (mut q, mut cc) = (queue(), cc());
        let now = Instant::now();
        let payload: &'static [u8] = &[7u8; 600];

        q.enqueue_ack(5, MessageSeq::new(1));
        q.enqueue_message(msg(5, 0, payload), &mut cc, &mut NoProbe, now);
        q.enqueue_message(msg(5, 1, payload), &mut cc, &mut NoProbe, now);
        // Overflow: packet 0 carries messages 0 and 1 plus ack 1.
        q.enqueue_message(msg(5, 2, payload), &mut cc, &mut NoProbe, now);

        q.enqueue_ack(5, MessageSeq::new(2));
        q.enqueue_message(msg(5, 3, payload), &mut cc, &mut NoProbe, now);
        // Overflow again within the same tick: channel 5 already had its ack.
        q.enqueue_message(msg(5, 4, payload), &mut cc, &mut NoProbe, now);
        assert_eq!(q.stats().overflow_flushes, 2);
        assert_eq!(q.pending_ack(5), Some(MessageSeq::new(2)));

        q.tick(&mut cc, &mut NoProbe, now);
        assert_eq!(q.pending_ack(5), None);

        let packets = sent(&q);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].frames[0].ack, Some(MessageSeq::new(1)));
        assert!(packets[1].frames.iter().all(|f| f.ack.is_none()));
        assert_eq!(packets[2].frames[0].ack, Some(MessageSeq::new(2)));
    }

    #[test]
    fn standalone_acks_deferred_when_packet_full() {
        let mut q = SendQueue::with_initial_sequence(MockConnection::new(200), PacketSeq::ZERO);
        let mut cc = cc();
        let now = Instant::now();
        for cq in 0..30 {
            q.enqueue_ack(cq, MessageSeq::new(cq as u32));
        }
        q.tick(&mut cc, &mut NoProbe, now);

        // 4-byte header leaves room for 24 ack-only frames of 8 bytes.
        let first = &sent(&q)[0];
        assert_eq!(first.frames.len(), 24);
        assert_eq!(q.pending_ack(23), None);
        assert_eq!(q.pending_ack(24), Some(MessageSeq::new(24)));

        q.tick(&mut cc, &mut NoProbe, now);
        let second = &sent(&q)[1];
        let channels: Vec<u8> = second.frames.iter().map(|f| f.channel_qualifier).collect();
        assert_eq!(channels, (24..30).collect::<Vec<u8>>());
    }

    #[test]
    fn buffer_releases_message_handles() {
        let (mut q, mut cc) = (queue(), cc());
        let now = Instant::now();
        let m = msg(0, 0, b"shared");
        q.enqueue_message(Arc::clone(&m), &mut cc, &mut NoProbe, now);
        assert_eq!(Arc::strong_count(&m), 2);
        q.tick(&mut cc, &mut NoProbe, now);
        assert_eq!(Arc::strong_count(&m), 1);
        assert_eq!(q.buffered_messages(), 0);
        assert_eq!(q.buffered_size(), 0);
    }

    #[test]
    fn heartbeat_flag_cleared_when_closed() {
        let (mut q, mut cc) = (queue(), cc());
        q.connection_mut().open = false;
        q.enqueue_heartbeat();
        assert!(!q.tick(&mut cc, &mut NoProbe, Instant::now()));

        q.connection_mut().open = true;
        assert!(!q.tick(&mut cc, &mut NoProbe, Instant::now()));
        assert!(q.connection().datagrams.is_empty());
    }

    #[test]
    fn stats_track_packets() {
        let (mut q, mut cc) = (queue(), cc());
        let now = Instant::now();
        q.enqueue_message(msg(0, 0, b"abc"), &mut cc, &mut NoProbe, now);
        q.enqueue_ack(1, MessageSeq::new(4));
        q.tick(&mut cc, &mut NoProbe, now);
        q.enqueue_heartbeat();
        q.tick(&mut cc, &mut NoProbe, now);

        let stats = q.stats();
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.standalone_acks_sent, 1);
        assert_eq!(stats.heartbeats_sent, 1);
        let total: usize = q.connection().datagrams.iter().map(Vec::len).sum();
        assert_eq!(stats.bytes_sent, total as u64);
    }

    /// Heartbeats the peer acks at once, as on an idle connection.
    fn idle_ticks(q: &mut SendQueue<MockConnection>, cc: &mut CongestionControl, ticks: u32) {
        let mut now = Instant::now();
        for _ in 0..ticks {
            q.enqueue_heartbeat();
            assert!(q.tick(cc, &mut NoProbe, now));
            let ack = PacketHeader {
                ack: cc.newest_sent_sn(),
                ..Default::default()
            };
            cc.got_packet(now, Duration::from_millis(20), q.next_sequence_number(), &ack, 8);
            now += Duration::from_millis(10);
        }
    }

    #[test]
    fn idle_heartbeats_keep_slow_start_allowance() {
        let (mut q, mut cc) = (queue(), cc());
        let before = cc.tick_allowance();
        let avg = cc.avg_packet_size();

        idle_ticks(&mut q, &mut cc, 60);

        assert_eq!(q.stats().heartbeats_sent, 60);
        assert_eq!(cc.avg_packet_size(), avg);
        assert_eq!(cc.packets_in_flight(), 0);
        assert!(cc.is_in_slow_start());
        assert!(cc.tick_allowance() >= before, "{} < {before}", cc.tick_allowance());
    }

    #[test]
    fn ack_only_packets_skip_size_average() {
        let (mut q, mut cc) = (queue(), cc());
        let avg = cc.avg_packet_size();
        for i in 0..20 {
            q.enqueue_ack(1, MessageSeq::new(i));
            q.tick(&mut cc, &mut NoProbe, Instant::now());
        }
        assert_eq!(q.stats().standalone_acks_sent, 20);
        assert_eq!(cc.avg_packet_size(), avg);
        assert_eq!(cc.packets_in_flight(), 20);
    }

    #[test]
    fn data_packets_feed_size_average() {
        let (mut q, mut cc) = (queue(), cc());
        q.enqueue_message(msg(0, 0, &[0u8; 100]), &mut cc, &mut NoProbe, Instant::now());
        q.tick(&mut cc, &mut NoProbe, Instant::now());
        assert!(cc.avg_packet_size() < INITIAL_PACKET_SIZE);
        assert_eq!(cc.newest_sent_sn(), Some(PacketSeq::new(100)));
    }
}
