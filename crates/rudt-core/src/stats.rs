//! # Transport Statistics
//!
//! Counters kept by the send queue and a snapshot of congestion control
//! state. Both serialize to JSON for export.

use serde::Serialize;

// ─── Send Queue Stats ───────────────────────────────────────────────────────

/// Outbound packetizer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendQueueStats {
    /// Datagrams handed to the connection (all kinds).
    pub packets_sent: u64,
    /// Total bytes handed to the connection, headers included.
    pub bytes_sent: u64,
    /// Data messages serialized into packets.
    pub messages_sent: u64,
    /// Connection-control messages sent standalone.
    pub control_packets_sent: u64,
    /// Zero-payload ack-only frames appended.
    pub standalone_acks_sent: u64,
    /// Header-only heartbeat packets.
    pub heartbeats_sent: u64,
    /// Flushes forced by the buffer reaching the MTU.
    pub overflow_flushes: u64,
}

impl SendQueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_packet(&mut self, len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += len as u64;
    }
}

// ─── Congestion Snapshot ────────────────────────────────────────────────────

/// Point-in-time view of a congestion controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CongestionSnapshot {
    pub slow_start: bool,
    /// Congestion window in packets.
    pub congestion_window: usize,
    /// Bytes per tick; 0 in slow start.
    pub sending_rate: f32,
    /// Bytes permitted in the current tick.
    pub tick_allowance: usize,
    pub avg_packet_size: f32,
    pub avg_nak_count: f32,
    pub nak_count: u32,
    pub dec_count: u32,
    /// Local estimates (packets/sec).
    pub link_capacity: f32,
    pub data_arrival_rate: f32,
    /// Peer-reported estimates (packets/sec).
    pub remote_link_capacity: Option<f32>,
    pub remote_data_arrival_rate: Option<f32>,
    pub rtt_us: u64,
}
