//! # Congestion Control
//!
//! Rate-based congestion control modeled on UDT's native algorithm.
//!
//! ## Phases
//!
//! ```text
//!   ┌────────────┐  slow-start bytes ≥ SLOW_START_EXIT_BYTES   ┌─────────────────┐
//!   │ SLOW START │  or window ≥ MAX_CONGESTION_WINDOW          │ RATE CONTROLLED │
//!   │ rate == 0  │────────────────────────────────────────────▶│    rate > 0     │
//!   │ window-    │  or first NAK / RTO                         │ AIMD on rate    │
//!   │ governed   │                                             │                 │
//!   └────────────┘                                             └─────────────────┘
//! ```
//!
//! - **Slow start**: `sending_rate` is 0 and the congestion window grows by
//!   the number of newly acknowledged packets.
//! - **Rate controlled**: once per [`RATE_CONTROL_INTERVAL`] an ACK raises
//!   the rate by an amount that grows with the gap between the current rate
//!   and the peer-reported link capacity. A NAK that opens a new congestion
//!   period cuts the rate multiplicatively; NAKs for an already-handled
//!   period only count.
//!
//! Rates are in bytes per tick, one tick being [`RATE_CONTROL_INTERVAL`].
//! Bandwidth estimates (local and remote) are in packets per second.

use quanta::Instant;
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use std::time::Duration;

use crate::estimator::{BandwidthEstimator, DataArrivalRate, LinkCapacity};
use crate::seq::PacketSeq;
use crate::stats::CongestionSnapshot;
use crate::wire::PacketHeader;

// ─── Algorithm Constants ────────────────────────────────────────────────────

/// Rate-control period; also the tick the sending rate is expressed in.
pub const RATE_CONTROL_INTERVAL: Duration = Duration::from_millis(10);

/// Congestion window (packets) at connection start.
pub const INITIAL_CONGESTION_WINDOW: usize = 16;

/// Upper bound of the congestion window (packets). Reaching it ends slow start.
pub const MAX_CONGESTION_WINDOW: usize = 8192;

/// Bytes sent in slow start after which the phase ends.
pub const SLOW_START_EXIT_BYTES: usize = 1 << 20;

/// Packet size assumed before any data has been sent.
pub const INITIAL_PACKET_SIZE: f32 = 1200.0;

/// RTT assumed before the first sample arrives.
pub const INITIAL_RTT: Duration = Duration::from_millis(100);

/// Smallest rate increase, in packets per tick.
pub const MIN_INCREASE: f32 = 0.01;

/// Multiplicative decrease applied per step.
pub const DECREASE_FACTOR: f32 = 1.0 / 1.125;

/// Most decrease steps applied when a congestion period opens.
pub const MAX_DECREASE_STEPS: u32 = 5;

/// Rate set by an RTO, and the least rate slow start exits with (bytes per
/// tick). NAK decreases may go below it.
pub const MIN_SENDING_RATE: f32 = 12.0;

/// Lower bound of a NAK decrease. Keeps the rate non-zero, since a zero
/// rate means slow start.
const MIN_DECREASED_RATE: f32 = f32::MIN_POSITIVE;

/// Packets added on top of the bandwidth-delay product when sizing the window.
const WINDOW_HEADROOM: f32 = 16.0;

// ─── Congestion Controller ──────────────────────────────────────────────────

/// Congestion controller for one connection.
pub struct CongestionControl<L = LinkCapacity, A = DataArrivalRate> {
    // ─── Window / rate ───
    congestion_window: usize,
    /// Bytes per tick; 0 means slow start.
    sending_rate: f32,
    total_data_sent_in_slow_start: usize,
    avg_packet_size: f32,

    // ─── Local estimators ───
    link_capacity: L,
    data_arrival_rate: A,

    // ─── Congestion period statistics ───
    /// Average number of NAKs per congestion period.
    avg_nak_count: f32,
    /// NAKs in the current congestion period.
    nak_count: u32,
    /// Rate decreases since the last RTO.
    dec_count: u32,
    dec_random: u32,
    /// Largest sent sequence number at the last decrease.
    last_dec_seq: Option<PacketSeq>,
    rate_at_last_decrease: f32,
    loss_since_increase: bool,
    last_rate_increase: Option<Instant>,

    // ─── Sequence bookkeeping ───
    first_sent_sn: Option<PacketSeq>,
    newest_sent_sn: Option<PacketSeq>,
    newest_seen_ack_sn: Option<PacketSeq>,
    newest_seen_sn: Option<PacketSeq>,
    newest_sent_ack_sn: Option<PacketSeq>,

    // ─── Peer feedback ───
    remote_link_capacity: Option<f32>,
    remote_data_arrival_rate: Option<f32>,
    rtt: Duration,

    rng: StdRng,
}

impl CongestionControl {
    /// Controller with the default estimators and an OS-seeded random source.
    pub fn new() -> Self {
        Self::with_rng(StdRng::seed_from_u64(rand::rng().random()))
    }

    /// Controller with the default estimators and the given random source.
    pub fn with_rng(rng: StdRng) -> Self {
        Self::with_estimators(LinkCapacity::new(), DataArrivalRate::new(), rng)
    }
}

impl Default for CongestionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: BandwidthEstimator, A: BandwidthEstimator> CongestionControl<L, A> {
    /// Controller with caller-supplied estimators.
    pub fn with_estimators(link_capacity: L, data_arrival_rate: A, rng: StdRng) -> Self {
        CongestionControl {
            congestion_window: INITIAL_CONGESTION_WINDOW,
            sending_rate: 0.0,
            total_data_sent_in_slow_start: 0,
            avg_packet_size: INITIAL_PACKET_SIZE,

            link_capacity,
            data_arrival_rate,

            avg_nak_count: 0.0,
            nak_count: 0,
            dec_count: 0,
            dec_random: 1,
            last_dec_seq: None,
            rate_at_last_decrease: 0.0,
            loss_since_increase: false,
            last_rate_increase: None,

            first_sent_sn: None,
            newest_sent_sn: None,
            newest_seen_ack_sn: None,
            newest_seen_sn: None,
            newest_sent_ack_sn: None,

            remote_link_capacity: None,
            remote_data_arrival_rate: None,
            rtt: INITIAL_RTT,

            rng,
        }
    }

    // ─── Inbound feedback ───────────────────────────────────────────────

    /// Process the control information of one received packet.
    ///
    /// `rtt` is the connection's current RTT estimate and
    /// `largest_sn_so_far` the largest packet sequence number sent so far.
    pub fn got_packet(
        &mut self,
        now: Instant,
        rtt: Duration,
        largest_sn_so_far: PacketSeq,
        packet_header: &PacketHeader,
        packet_length: usize,
    ) {
        if !rtt.is_zero() {
            self.rtt = rtt;
        }

        if let Some(rate) = packet_header.arrival_rate.filter(|r| r.is_finite() && *r >= 0.0) {
            self.remote_data_arrival_rate = Some(rate);
        }
        if let Some(capacity) = packet_header.link_capacity.filter(|c| c.is_finite() && *c >= 0.0)
        {
            self.remote_link_capacity = Some(capacity);
        }

        if let Some(ack) = packet_header.ack {
            let newly_acked = match self.newest_seen_ack_sn {
                None => 1,
                Some(prev) if ack.is_after(prev) => prev.forward_distance(ack) as usize,
                Some(_) => 0,
            };
            if newly_acked > 0 {
                self.newest_seen_ack_sn = Some(ack);
                self.on_ack(now, newly_acked);
            }
        }

        if let Some(nak) = packet_header.nak {
            self.on_nak(nak, largest_sn_so_far);
        }

        if let Some(sn) = packet_header.sequence_number {
            self.newest_seen_sn = Some(match self.newest_seen_sn {
                Some(prev) => prev.cyclic_max(sn),
                None => sn,
            });
        }

        self.link_capacity
            .got_packet(now, packet_header.sequence_number, packet_length);
        self.data_arrival_rate
            .got_packet(now, packet_header.sequence_number, packet_length);
    }

    fn on_ack(&mut self, now: Instant, newly_acked: usize) {
        if self.is_in_slow_start() {
            self.congestion_window =
                (self.congestion_window + newly_acked).min(MAX_CONGESTION_WINDOW);
            if self.total_data_sent_in_slow_start >= SLOW_START_EXIT_BYTES
                || self.congestion_window >= MAX_CONGESTION_WINDOW
            {
                self.end_slow_start_phase();
            }
            return;
        }

        if let Some(last) = self.last_rate_increase {
            if now.saturating_duration_since(last) < RATE_CONTROL_INTERVAL {
                return;
            }
        }
        self.last_rate_increase = Some(now);

        if let Some(arrival) = self.remote_data_arrival_rate.filter(|r| *r > 0.0) {
            let bdp = arrival * (self.rtt + RATE_CONTROL_INTERVAL).as_secs_f32();
            self.congestion_window =
                ((bdp + WINDOW_HEADROOM) as usize).clamp(1, MAX_CONGESTION_WINDOW);
        }

        // The first interval after a loss only re-arms the increase.
        if self.loss_since_increase {
            self.loss_since_increase = false;
            return;
        }

        let inc = self.rate_increase();
        self.sending_rate += inc * self.avg_packet_size;
        tracing::trace!(inc, sending_rate = self.sending_rate, "rate increase");
    }

    /// Packets per tick to add to the rate, per UDT's increase rule.
    fn rate_increase(&self) -> f32 {
        let capacity = self.remote_link_capacity.unwrap_or(0.0);
        let mut spare = capacity - self.packets_per_second();
        if self.sending_rate < self.rate_at_last_decrease && capacity / 9.0 < spare {
            spare = capacity / 9.0;
        }
        if spare <= 0.0 {
            return MIN_INCREASE;
        }

        let mss = self.avg_packet_size;
        let magnitude = 10f32.powf((spare * mss * 8.0).log10().ceil());
        (magnitude * 0.000_001_5 / mss).max(MIN_INCREASE)
    }

    /// Current sending rate converted to packets per second.
    fn packets_per_second(&self) -> f32 {
        self.sending_rate / self.avg_packet_size / RATE_CONTROL_INTERVAL.as_secs_f32()
    }

    fn on_nak(&mut self, nak: PacketSeq, largest_sn_so_far: PacketSeq) {
        if self.is_in_slow_start() {
            self.end_slow_start_phase();
        }
        self.loss_since_increase = true;

        let new_period = self.last_dec_seq.map_or(true, |last| nak.is_after(last));
        if !new_period {
            self.nak_count += 1;
            tracing::trace!(%nak, nak_count = self.nak_count, "nak within handled congestion period");
            return;
        }

        self.rate_at_last_decrease = self.sending_rate;
        self.avg_nak_count = (self.avg_nak_count * 0.875 + self.nak_count as f32 * 0.125).ceil();
        self.nak_count = 1;

        let upper = (self.avg_nak_count as u32).max(1);
        self.dec_random = self.rng.random_range(1..=upper);
        let steps = (self.avg_nak_count / self.dec_random as f32)
            .ceil()
            .clamp(1.0, MAX_DECREASE_STEPS as f32) as i32;

        self.sending_rate =
            (self.sending_rate * DECREASE_FACTOR.powi(steps)).max(MIN_DECREASED_RATE);
        self.dec_count += 1;
        self.last_dec_seq = Some(largest_sn_so_far);

        tracing::debug!(
            %nak,
            steps,
            dec_random = self.dec_random,
            avg_nak_count = self.avg_nak_count,
            sending_rate = self.sending_rate,
            "congestion period opened, rate decreased"
        );
    }

    fn end_slow_start_phase(&mut self) {
        if !self.is_in_slow_start() {
            return;
        }
        let tick = RATE_CONTROL_INTERVAL.as_secs_f32();
        let rate = match self.remote_data_arrival_rate.filter(|r| *r > 0.0) {
            Some(pps) => pps * self.avg_packet_size * tick,
            None => {
                let window_bytes = self.congestion_window as f32 * self.avg_packet_size;
                window_bytes / (self.rtt + RATE_CONTROL_INTERVAL).as_secs_f32() * tick
            }
        };
        self.sending_rate = rate.max(MIN_SENDING_RATE);
        tracing::debug!(
            sending_rate = self.sending_rate,
            congestion_window = self.congestion_window,
            slow_start_bytes = self.total_data_sent_in_slow_start,
            "slow start ended"
        );
    }

    /// Retransmission timeout: the most severe congestion signal.
    pub fn on_rto(&mut self) {
        self.sending_rate = MIN_SENDING_RATE;
        self.nak_count = 0;
        self.dec_count = 0;
        self.loss_since_increase = true;
        tracing::debug!(sending_rate = self.sending_rate, "retransmission timeout");
    }

    // ─── Outbound bookkeeping ───────────────────────────────────────────

    /// Record a transmitted sequenced packet that carries no message
    /// payload (heartbeat, ack-only). Counts toward the packets in flight
    /// but not toward the slow-start byte count or the average packet size.
    pub fn on_packet_sent(&mut self, sequence_number: PacketSeq) {
        if self.first_sent_sn.is_none() {
            self.first_sent_sn = Some(sequence_number);
        }
        self.newest_sent_sn = Some(sequence_number);
    }

    /// Record a transmitted packet carrying message payload, `size` bytes
    /// on the wire.
    pub fn on_data_sent(&mut self, sequence_number: PacketSeq, size: usize) {
        self.on_packet_sent(sequence_number);

        if self.is_in_slow_start() {
            self.total_data_sent_in_slow_start += size;
            self.avg_packet_size = self.avg_packet_size * 0.875 + size as f32 * 0.125;
        }
    }

    /// Newest seen packet sequence number, returned once per novelty.
    /// Intended to be called once per tick.
    pub fn ack(&mut self) -> Option<PacketSeq> {
        match self.newest_seen_sn {
            Some(sn) if self.newest_sent_ack_sn != Some(sn) => {
                self.newest_sent_ack_sn = Some(sn);
                Some(sn)
            }
            _ => None,
        }
    }

    /// Packets sent but not yet covered by an acknowledgment.
    pub fn packets_in_flight(&self) -> usize {
        let Some(sent) = self.newest_sent_sn else {
            return 0;
        };
        match self.newest_seen_ack_sn {
            Some(acked) if sent.is_after(acked) => acked.forward_distance(sent) as usize,
            Some(_) => 0,
            None => self
                .first_sent_sn
                .map_or(0, |first| first.forward_distance(sent) as usize + 1),
        }
    }

    /// Bytes the sender may transmit in the current tick.
    ///
    /// In slow start this is the free room in the congestion window;
    /// afterwards it is the sending rate, still capped by that room.
    pub fn tick_allowance(&self) -> usize {
        let room = self
            .congestion_window
            .saturating_sub(self.packets_in_flight());
        let window_bytes = room as f32 * self.avg_packet_size;
        if self.is_in_slow_start() {
            window_bytes as usize
        } else {
            self.sending_rate.min(window_bytes) as usize
        }
    }

    // ─── Getters ────────────────────────────────────────────────────────

    /// Local link capacity estimate (packets/sec).
    pub fn link_capacity(&self) -> f32 {
        self.link_capacity.calculate()
    }

    /// Local data arrival rate estimate (packets/sec).
    pub fn data_arrival_rate(&self) -> f32 {
        self.data_arrival_rate.calculate()
    }

    pub fn is_in_slow_start(&self) -> bool {
        self.sending_rate == 0.0
    }

    pub fn sending_rate(&self) -> f32 {
        self.sending_rate
    }

    pub fn congestion_window(&self) -> usize {
        self.congestion_window
    }

    pub fn avg_packet_size(&self) -> f32 {
        self.avg_packet_size
    }

    pub fn nak_count(&self) -> u32 {
        self.nak_count
    }

    pub fn dec_count(&self) -> u32 {
        self.dec_count
    }

    pub fn last_dec_seq(&self) -> Option<PacketSeq> {
        self.last_dec_seq
    }

    pub fn newest_sent_sn(&self) -> Option<PacketSeq> {
        self.newest_sent_sn
    }

    pub fn remote_link_capacity(&self) -> Option<f32> {
        self.remote_link_capacity
    }

    pub fn remote_data_arrival_rate(&self) -> Option<f32> {
        self.remote_data_arrival_rate
    }

    /// Serializable view of the controller state.
    pub fn snapshot(&self) -> CongestionSnapshot {
        CongestionSnapshot {
            slow_start: self.is_in_slow_start(),
            congestion_window: self.congestion_window,
            sending_rate: self.sending_rate,
            tick_allowance: self.tick_allowance(),
            avg_packet_size: self.avg_packet_size,
            avg_nak_count: self.avg_nak_count,
            nak_count: self.nak_count,
            dec_count: self.dec_count,
            link_capacity: self.link_capacity(),
            data_arrival_rate: self.data_arrival_rate(),
            remote_link_capacity: self.remote_link_capacity,
            remote_data_arrival_rate: self.remote_data_arrival_rate,
            rtt_us: self.rtt.as_micros() as u64,
        }
    }
}
