//! # Connection Timing
//!
//! RTT probing piggybacked on outgoing packets. The send queue asks
//! [`RttClock::rtt_request`] once per built packet whether that packet
//! should carry an RTT request; the peer answers with an RTT response in
//! one of its own headers, stamped with how long the request waited.
//!
//! ```text
//!   A ──[seq=17, RTT_REQUEST]──────────────▶ B
//!   A ◀──────────[RTT_RESPONSE 17, delay]─── B
//!   rtt = (now - sent_at(17)) - delay
//! ```

use quanta::Instant;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::seq::PacketSeq;
use crate::wire::RttResponse;

/// Decides which outgoing packets carry an RTT request.
pub trait RttClock {
    /// Called with the sequence number of a packet about to be sent.
    /// Returns `true` (and records the probe) if it should request an RTT
    /// response.
    fn rtt_request(&mut self, now: Instant, sequence_number: PacketSeq) -> bool;
}

/// RTT and RTO tracker for one connection.
#[derive(Debug, Clone)]
pub struct ConnTime {
    rtt_request_interval: Duration,
    initial_rtt: Duration,
    min_rto: Duration,
    max_rto: Duration,

    /// Probe awaiting its response.
    outstanding: Option<(PacketSeq, Instant)>,
    last_request: Option<Instant>,

    /// Smoothed RTT (SRTT) in µs.
    srtt_us: f64,
    /// RTT variation (RTTVAR) in µs.
    rttvar_us: f64,
    min_rtt_us: f64,
    sample_count: u64,
}

impl ConnTime {
    pub fn new(config: &TransportConfig) -> Self {
        ConnTime {
            rtt_request_interval: config.rtt_request_interval,
            initial_rtt: config.initial_rtt,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            outstanding: None,
            last_request: None,
            srtt_us: 0.0,
            rttvar_us: 0.0,
            min_rtt_us: f64::MAX,
            sample_count: 0,
        }
    }

    /// Match an RTT response against the outstanding probe.
    /// Returns the measured RTT, or `None` for stale or unknown responses.
    pub fn got_rtt_response(&mut self, now: Instant, response: RttResponse) -> Option<Duration> {
        match self.outstanding {
            Some((sn, _)) if sn == response.sequence_number => {}
            _ => return None,
        }
        let (_, sent_at) = self.outstanding.take()?;

        let elapsed = now.saturating_duration_since(sent_at);
        let rtt = elapsed.saturating_sub(Duration::from_millis(response.delay_ms as u64));
        if rtt.is_zero() {
            return None;
        }
        let rtt_us = rtt.as_micros() as f64;

        self.sample_count += 1;
        if rtt_us < self.min_rtt_us {
            self.min_rtt_us = rtt_us;
        }

        // RFC 6298 SRTT/RTTVAR update
        if self.sample_count == 1 {
            self.srtt_us = rtt_us;
            self.rttvar_us = rtt_us / 2.0;
        } else {
            // α = 1/8, β = 1/4
            self.rttvar_us = 0.75 * self.rttvar_us + 0.25 * (self.srtt_us - rtt_us).abs();
            self.srtt_us = 0.875 * self.srtt_us + 0.125 * rtt_us;
        }

        tracing::trace!(rtt_us, srtt_us = self.srtt_us, "rtt sample");
        Some(rtt)
    }

    /// Smoothed RTT, or the configured initial RTT before any sample.
    pub fn rtt(&self) -> Duration {
        if self.sample_count == 0 {
            self.initial_rtt
        } else {
            Duration::from_micros(self.srtt_us as u64)
        }
    }

    /// Retransmission timeout: `SRTT + 4 * RTTVAR`, clamped.
    pub fn rto(&self) -> Duration {
        let raw = if self.sample_count == 0 {
            self.initial_rtt * 3
        } else {
            Duration::from_micros((self.srtt_us + 4.0 * self.rttvar_us) as u64)
        };
        raw.clamp(self.min_rto, self.max_rto)
    }

    /// Smallest RTT observed.
    pub fn min_rtt(&self) -> Option<Duration> {
        (self.sample_count > 0).then(|| Duration::from_micros(self.min_rtt_us as u64))
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Whether a probe is still waiting for its response.
    pub fn has_outstanding_request(&self) -> bool {
        self.outstanding.is_some()
    }
}

impl RttClock for ConnTime {
    fn rtt_request(&mut self, now: Instant, sequence_number: PacketSeq) -> bool {
        let due = self
            .last_request
            .map_or(true, |last| now.saturating_duration_since(last) >= self.rtt_request_interval);
        if !due {
            return false;
        }
        self.outstanding = Some((sequence_number, now));
        self.last_request = Some(now);
        true
    }
}
