//! # Pipeline Statistics
//!
//! Counters kept by the sender, receiver and trimmer pipelines. All stats
//! serialize to JSON for the node's periodic log lines and exit dump.

use serde::Serialize;

// ─── Sender Stats ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// Packets emitted.
    pub packets_sent: u64,
    /// Encoded bytes emitted, framing included.
    pub bytes_sent: u64,
    /// Content bytes emitted.
    pub payload_bytes: u64,
    /// Chunks carrying layer groups.
    pub vcl_chunks: u64,
    /// Chunks carrying packed parameter sets and other non-VCL units.
    pub non_vcl_chunks: u64,
    /// Empty contents sent for layers with nothing left in a chunk.
    pub placeholders: u64,
    /// NAL units pulled from the source.
    pub nals_consumed: u64,
    /// Layer groups started.
    pub video_units: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Framing bytes per content byte.
    pub fn overhead_ratio(&self) -> f64 {
        if self.payload_bytes == 0 {
            0.0
        } else {
            (self.bytes_sent - self.payload_bytes) as f64 / self.payload_bytes as f64
        }
    }
}

// ─── Receiver Stats ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Datagrams handed to the receiver.
    pub packets_received: u64,
    pub bytes_received: u64,
    /// Datagrams that failed to decode.
    pub decode_errors: u64,
    /// Packets discarded by the reorder window as duplicates.
    pub duplicates: u64,
    /// Packets that arrived after their slot was released.
    pub late_packets: u64,
    /// Sequencing gaps seen by the reassembler.
    pub missing_events: u64,
    /// NAL units rebuilt intact.
    pub nals_rebuilt: u64,
    /// Layers washed in-network.
    pub nals_washed: u64,
    /// Layers with no data received.
    pub nals_dropped: u64,
    /// Layers with fragments missing or corrupt.
    pub nals_lost: u64,
    /// NAL units handed to the sink.
    pub nals_delivered: u64,
    /// Intact NAL units withheld because a lower layer was missing.
    pub nals_suppressed: u64,
    /// Whole video units that never arrived, inferred from NAL-number gaps.
    pub video_units_lost: u64,
    /// 12-bit NAL number wraparounds.
    pub nal_no_wraps: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered units as a share of units rebuilt.
    pub fn delivery_ratio(&self) -> f64 {
        if self.nals_rebuilt == 0 {
            0.0
        } else {
            self.nals_delivered as f64 / self.nals_rebuilt as f64
        }
    }
}

// ─── Trim Stats ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrimStats {
    pub packets_in: u64,
    pub bytes_in: u64,
    /// Packets passed on unchanged.
    pub packets_forwarded: u64,
    /// Packets re-serialized with washed contents.
    pub packets_trimmed: u64,
    /// Packets discarded by a `Drop` command.
    pub packets_dropped: u64,
    pub bytes_out: u64,
    /// Content bytes removed by washing.
    pub bytes_washed: u64,
    pub contents_washed: u64,
    /// Extra passes run with a relaxed threshold.
    pub relaxations: u64,
    pub decode_errors: u64,
    /// One-second budget windows started.
    pub windows: u64,
}

impl TrimStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of incoming bytes removed by washing.
    pub fn wash_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            0.0
        } else {
            self.bytes_washed as f64 / self.bytes_in as f64
        }
    }
}
