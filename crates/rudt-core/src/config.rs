//! # Transport Configuration
//!
//! Per-connection tunables that are not part of the congestion control
//! algorithm itself. Loaded from TOML; every field is optional and falls
//! back to [`TransportConfig::default`].
//!
//! ```toml
//! mtu = 1400
//! rtt_request_interval_ms = 500
//! initial_rtt_ms = 100
//! min_rto_ms = 200
//! max_rto_ms = 10000
//! ```

use std::time::Duration;

use anyhow::{bail, ensure, Context};
use serde::Deserialize;

use crate::wire::{MAX_PACKET_HEADER_LEN, MESSAGE_HEADER_LEN};

/// Smallest MTU that still fits a full header and one ack-carrying frame.
pub const MIN_MTU: usize = MAX_PACKET_HEADER_LEN + MESSAGE_HEADER_LEN + 2 + 32;

/// Raw, partially specified configuration as read from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfigInput {
    pub mtu: Option<usize>,
    pub rtt_request_interval_ms: Option<u64>,
    pub initial_rtt_ms: Option<u64>,
    pub min_rto_ms: Option<u64>,
    pub max_rto_ms: Option<u64>,
}

/// Resolved transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest datagram the connection may emit (bytes).
    pub mtu: usize,
    /// Minimum spacing between RTT probes.
    pub rtt_request_interval: Duration,
    /// RTT assumed before the first measurement.
    pub initial_rtt: Duration,
    /// Lower bound of the retransmission timeout.
    pub min_rto: Duration,
    /// Upper bound of the retransmission timeout.
    pub max_rto: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            mtu: 1400,
            rtt_request_interval: Duration::from_millis(500),
            initial_rtt: Duration::from_millis(100),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(10),
        }
    }
}

impl TransportConfigInput {
    /// Fill in defaults and validate.
    pub fn resolve(self) -> anyhow::Result<TransportConfig> {
        let defaults = TransportConfig::default();
        let ms = Duration::from_millis;

        let config = TransportConfig {
            mtu: self.mtu.unwrap_or(defaults.mtu),
            rtt_request_interval: self
                .rtt_request_interval_ms
                .map(ms)
                .unwrap_or(defaults.rtt_request_interval),
            initial_rtt: self.initial_rtt_ms.map(ms).unwrap_or(defaults.initial_rtt),
            min_rto: self.min_rto_ms.map(ms).unwrap_or(defaults.min_rto),
            max_rto: self.max_rto_ms.map(ms).unwrap_or(defaults.max_rto),
        };

        if config.mtu < MIN_MTU {
            bail!("mtu {} is below the minimum of {}", config.mtu, MIN_MTU);
        }
        ensure!(
            config.min_rto <= config.max_rto,
            "min_rto ({:?}) exceeds max_rto ({:?})",
            config.min_rto,
            config.max_rto
        );
        ensure!(
            !config.initial_rtt.is_zero(),
            "initial_rtt must be non-zero"
        );
        Ok(config)
    }
}

impl TransportConfig {
    /// Parse and resolve a TOML document. An empty document yields defaults.
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        if input.trim().is_empty() {
            return Ok(TransportConfig::default());
        }
        let parsed: TransportConfigInput =
            toml::from_str(input).context("invalid transport config TOML")?;
        parsed.resolve()
    }
}
