#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use quanta::Instant;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rudt_core::seq::PacketSeq;
use rudt_core::wire::Packet;
use rudt_core::CongestionControl;
use std::time::Duration;

/// Feed arbitrary headers to the congestion controller.
///
/// Input is split into length-prefixed datagrams. Whatever the peer claims,
/// the controller must not panic and must keep its rate sane.
fuzz_target!(|data: &[u8]| {
    let mut cc = CongestionControl::with_rng(StdRng::seed_from_u64(0));
    let mut now = Instant::now();
    let mut rest = data;
    let mut sent = PacketSeq::ZERO;

    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len());
        let (datagram, tail) = tail.split_at(len);
        rest = tail;

        now += Duration::from_millis(1);
        cc.on_data_sent(sent, 1000);
        sent = sent.next();

        if let Some(pkt) = Packet::decode(Bytes::copy_from_slice(datagram)) {
            cc.got_packet(now, Duration::from_millis(30), sent, &pkt.header, datagram.len());
        }
        let _ = cc.tick_allowance();
        assert!(cc.is_in_slow_start() || cc.sending_rate() > 0.0);
        let _ = cc.ack();
    }
});
