//! # Bandwidth Estimators
//!
//! Receive-side samplers whose estimates are piggybacked to the peer in
//! packet headers and consumed by the peer's congestion controller.
//!
//! Both estimators report packets per second; `0.0` means "no estimate
//! yet". The sampling follows UDT:
//!
//! - [`LinkCapacity`] — packet pairs. A packet whose sequence number is a
//!   multiple of [`PROBE_SPACING`] opens a probe; if its immediate successor
//!   is the next packet to arrive, the gap between them is a capacity sample.
//! - [`DataArrivalRate`] — inter-arrival gaps of all packets, filtered
//!   around the median to reject bursts and idle periods.

use quanta::Instant;
use std::collections::VecDeque;

use crate::seq::PacketSeq;

/// Every n-th packet sequence number opens a packet-pair probe.
pub const PROBE_SPACING: u32 = 16;

/// Capacity samples kept for the median.
pub const CAPACITY_WINDOW: usize = 16;

/// Inter-arrival gaps kept for the arrival rate.
pub const ARRIVAL_WINDOW: usize = 16;

/// A black-box bandwidth estimator fed with every inbound packet.
pub trait BandwidthEstimator {
    /// Record an inbound packet.
    fn got_packet(&mut self, now: Instant, sequence_number: Option<PacketSeq>, packet_length: usize);

    /// Current estimate in packets per second, or `0.0` if unknown.
    fn calculate(&self) -> f32;
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

// ─── Link Capacity ───────────────────────────────────────────────────────────

/// Packet-pair link capacity estimator.
#[derive(Debug, Clone, Default)]
pub struct LinkCapacity {
    probe: Option<(PacketSeq, Instant)>,
    samples: VecDeque<f32>,
}

impl LinkCapacity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of capacity samples currently held.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl BandwidthEstimator for LinkCapacity {
    fn got_packet(&mut self, now: Instant, sequence_number: Option<PacketSeq>, _packet_length: usize) {
        let Some(sn) = sequence_number else {
            // Unsequenced packets break a pair.
            self.probe = None;
            return;
        };

        if let Some((probe_sn, probe_time)) = self.probe.take() {
            if probe_sn.next() == sn {
                let gap = now.saturating_duration_since(probe_time).as_secs_f32();
                if gap > 0.0 {
                    self.samples.push_back(1.0 / gap);
                    if self.samples.len() > CAPACITY_WINDOW {
                        self.samples.pop_front();
                    }
                }
            }
        }

        if sn.value() % PROBE_SPACING == 0 {
            self.probe = Some((sn, now));
        }
    }

    fn calculate(&self) -> f32 {
        let mut samples: Vec<f32> = self.samples.iter().copied().collect();
        median(&mut samples)
    }
}

// ─── Data Arrival Rate ───────────────────────────────────────────────────────

/// Median-filtered packet arrival rate estimator.
#[derive(Debug, Clone, Default)]
pub struct DataArrivalRate {
    last_arrival: Option<Instant>,
    /// Inter-arrival gaps in seconds.
    intervals: VecDeque<f32>,
}

impl DataArrivalRate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BandwidthEstimator for DataArrivalRate {
    fn got_packet(&mut self, now: Instant, _sequence_number: Option<PacketSeq>, _packet_length: usize) {
        if let Some(prev) = self.last_arrival {
            self.intervals
                .push_back(now.saturating_duration_since(prev).as_secs_f32());
            if self.intervals.len() > ARRIVAL_WINDOW {
                self.intervals.pop_front();
            }
        }
        self.last_arrival = Some(now);
    }

    fn calculate(&self) -> f32 {
        let mut sorted: Vec<f32> = self.intervals.iter().copied().collect();
        let median = median(&mut sorted);
        let (lower, upper) = (median / 8.0, median * 8.0);

        let (count, sum) = self
            .intervals
            .iter()
            .filter(|&&gap| gap > lower && gap < upper)
            .fold((0usize, 0.0f32), |(n, s), &gap| (n + 1, s + gap));

        if count > ARRIVAL_WINDOW / 2 && sum > 0.0 {
            count as f32 / sum
        } else {
            0.0
        }
    }
}
