//! # rudt-core
//!
//! Sending core of a reliable UDP transport: UDT-style rate-based
//! congestion control and a tick-driven packetizer that coalesces
//! messages, per-channel acks and header feedback into MTU-bounded
//! datagrams.
//!
//! Everything here is synchronous and single-threaded. A connection drives
//! [`send_queue::SendQueue::tick`] periodically and feeds every inbound
//! header to [`congestion::CongestionControl::got_packet`]; socket I/O,
//! handshakes and receive-side reassembly live elsewhere.
//!
//! ## Crate structure
//!
//! - [`seq`] — 24-bit packet and 16-bit message cyclic sequence numbers
//! - [`wire`] — Packet header flags and codec, message frame codec
//! - [`message`] — Outgoing messages and priorities
//! - [`estimator`] — Link capacity and data arrival rate estimators
//! - [`conn_time`] — RTT probing and RTO tracking
//! - [`congestion`] — Slow start and rate-based AIMD congestion control
//! - [`send_queue`] — Packetizer with ack piggybacking and heartbeats
//! - [`stats`] — Serializable counters and congestion snapshots
//! - [`config`] — TOML-loadable transport configuration

pub mod config;
pub mod congestion;
pub mod conn_time;
pub mod estimator;
pub mod message;
pub mod send_queue;
pub mod seq;
pub mod stats;
pub mod wire;

pub use congestion::CongestionControl;
pub use send_queue::{Connection, SendQueue};
