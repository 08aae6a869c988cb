//! # Receiver Pipeline
//!
//! Pure logic, no I/O. Accepts raw wire-format bytes from the network layer
//! and delivers decodable NAL units in stream order.
//!
//! ```text
//! bytes → Packet::decode → ReorderBuffer → ChunkDecoder → Reassembler
//!       → DependencyAnalyzer → output queue
//! ```
//!
//! The receiver does NOT own sockets; the node feeds it datagrams.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::dependency::DependencyAnalyzer;
use crate::error::WireError;
use crate::layers::TemporalLayerModel;
use crate::nal::Nal;
use crate::reassembler::{ChunkDecoder, NalResult, Reassembler, RebuildState};
use crate::reorder::ReorderBuffer;
use crate::stats::ReceiverStats;
use crate::wire::Packet;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Quality layers per access unit; must match the sender.
    pub layers: usize,
    /// Must match the sender's pattern for I-picture resets to line up.
    pub temporal: TemporalLayerModel,
    /// Packets held for resequencing (0 = deliver in arrival order).
    pub reorder_window: usize,
    /// First NAL number to expect; `None` syncs to the first chunk seen.
    pub initial_nal_number: Option<u32>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            layers: 3,
            temporal: TemporalLayerModel::default(),
            reorder_window: 0,
            initial_nal_number: None,
        }
    }
}

// ─── Receiver ────────────────────────────────────────────────────────────────

pub struct Receiver {
    reorder: ReorderBuffer<Packet>,
    decoder: ChunkDecoder,
    reassembler: Reassembler,
    analyzer: DependencyAnalyzer,
    output: VecDeque<Nal>,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Receiver {
            reorder: ReorderBuffer::new(config.reorder_window),
            decoder: ChunkDecoder::new(),
            reassembler: Reassembler::new(config.initial_nal_number),
            analyzer: DependencyAnalyzer::new(config.layers, config.temporal),
            output: VecDeque::new(),
            stats: ReceiverStats::new(),
        }
    }

    /// Feed one datagram. A decode failure drops the datagram; the stream
    /// carries on with the next one.
    pub fn receive(&mut self, data: Bytes) -> Result<(), WireError> {
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;

        let packet = match Packet::decode(&mut data.clone()) {
            Ok(p) => p,
            Err(e) => {
                self.stats.decode_errors += 1;
                return Err(e);
            }
        };

        let seq = packet.command.sequence;
        for packet in self.reorder.push(seq, packet) {
            self.handle_packet(&packet);
        }
        self.sync_counters();
        Ok(())
    }

    /// End of stream: release held packets and resolve any unfinished group.
    pub fn finish(&mut self) {
        for packet in self.reorder.flush() {
            self.handle_packet(&packet);
        }
        if let Some(state) = self.reassembler.finish() {
            self.handle_state(state);
        }
        self.sync_counters();
    }

    /// Take all NAL units ready for the decoder.
    pub fn drain_nals(&mut self) -> Vec<Nal> {
        self.output.drain(..).collect()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    fn handle_packet(&mut self, packet: &Packet) {
        let Some(chunk) = self.decoder.decode(packet) else {
            return;
        };
        for state in self.reassembler.push(chunk) {
            self.handle_state(state);
        }
    }

    fn handle_state(&mut self, state: RebuildState) {
        match &state {
            RebuildState::NalValues(nals) => self.stats.nals_rebuilt += nals.len() as u64,
            RebuildState::Processing => {}
            RebuildState::FragmentEnd(results) => self.count_results(results),
            RebuildState::Missing { abandoned, .. } => {
                self.stats.missing_events += 1;
                self.count_results(abandoned);
            }
        }
        self.output.extend(self.analyzer.process(state));
    }

    fn count_results(&mut self, results: &[NalResult]) {
        for r in results {
            match r {
                NalResult::Nal(_) => self.stats.nals_rebuilt += 1,
                NalResult::Washed => self.stats.nals_washed += 1,
                NalResult::Dropped => self.stats.nals_dropped += 1,
                NalResult::Lost => self.stats.nals_lost += 1,
            }
        }
    }

    fn sync_counters(&mut self) {
        self.stats.duplicates = self.reorder.duplicates();
        self.stats.late_packets = self.reorder.late();
        self.stats.nals_delivered = self.analyzer.yielded();
        self.stats.nals_suppressed = self.analyzer.suppressed();
        self.stats.video_units_lost = self.analyzer.units_lost();
        self.stats.nal_no_wraps = self.decoder.wraps();
    }
}
