//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use quanta::Instant;
use rudt_core::conn_time::RttClock;
use rudt_core::seq::PacketSeq;
use rudt_core::wire::Packet;
use rudt_core::Connection;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Records datagrams instead of sending them.
pub struct MockConnection {
    pub datagrams: Vec<Bytes>,
    pub open: bool,
    pub mtu: usize,
}

impl MockConnection {
    pub fn new(mtu: usize) -> Self {
        MockConnection {
            datagrams: Vec::new(),
            open: true,
            mtu,
        }
    }

    /// Take every datagram recorded so far.
    pub fn take(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.datagrams)
    }

    /// Decode every datagram recorded so far.
    pub fn packets(&self) -> Vec<Packet> {
        self.datagrams
            .iter()
            .map(|d| Packet::decode(d.clone()).expect("malformed datagram"))
            .collect()
    }
}

impl Connection for MockConnection {
    fn send_datagram(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.mtu,
            "datagram of {} bytes exceeds mtu {}",
            data.len(),
            self.mtu
        );
        self.datagrams.push(Bytes::copy_from_slice(data));
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

/// RTT clock that never probes.
pub struct NoProbe;

impl RttClock for NoProbe {
    fn rtt_request(&mut self, _now: Instant, _sequence_number: PacketSeq) -> bool {
        false
    }
}
