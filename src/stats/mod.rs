use serde::{Deserialize, Serialize};

/// StreamStats is one snapshot of the network counters the media engine
/// maintains for an active stream, reported by the periodic poller for
/// diagnostics and liveness checking.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_lost: i64,
    pub jitter_ms: f64,
    pub round_trip_time_ms: f64,

    /// Highest media timestamp observed on received packets. A value that
    /// does not advance between two consecutive polls marks the stream as
    /// stalled.
    pub last_rx_timestamp: u64,
}
