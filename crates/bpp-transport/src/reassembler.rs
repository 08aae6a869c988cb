//! # Reassembler
//!
//! Rebuilds NAL units from received chunks.
//!
//! [`ChunkDecoder`] turns decoded packets back into [`SvcChunk`]s, undoing the
//! 12-bit wrap of the NAL number. [`Reassembler`] then tracks the NAL number
//! it expects next and collects per-layer fragments until every layer of a
//! group has delivered its last fragment.
//!
//! Loss is data here, not an error: a sequencing gap is reported as
//! [`RebuildState::Missing`], and each layer of a finished group resolves to
//! a [`NalResult`] that may be `Washed`, `Dropped` or `Lost`.

use bytes::BytesMut;

use crate::chunk::{ChunkContent, SvcChunk};
use crate::nal::{split_annex_b, Nal};
use crate::wire::{NalType, Packet, FRAG_NO_MODULUS, NAL_NO_MODULUS};

// ─── Results ─────────────────────────────────────────────────────────────────

/// Outcome for one NAL unit (one quality layer of a group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NalResult {
    Nal(Nal),
    /// At least one fragment was washed in-network.
    Washed,
    /// No fragment of this layer arrived.
    Dropped,
    /// Fragments arrived but the unit can't be rebuilt.
    Lost,
}

/// What the reassembler made of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildState {
    /// Non-VCL units unpacked from one content (empty if it was washed).
    NalValues(Vec<Nal>),
    /// Fragments stored, group not finished yet.
    Processing,
    /// A layer group finished; one result per layer, base layer first.
    FragmentEnd(Vec<NalResult>),
    /// The chunk didn't carry the expected NAL number. Any group in
    /// progress was abandoned and its per-layer results are attached.
    Missing {
        expected: u32,
        actual: u32,
        abandoned: Vec<NalResult>,
    },
}

// ─── Chunk Decoder ───────────────────────────────────────────────────────────

/// Packet → chunk conversion with NAL number unwrapping.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    /// Multiple of 2^12 added to wire values.
    base: u32,
    /// Newest wire value seen.
    last: Option<u32>,
    wraps: u64,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the 12-bit NAL number wrapped.
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    /// Rebuild the chunk a packet carries. `None` for a packet without
    /// contents.
    pub fn decode(&mut self, packet: &Packet) -> Option<SvcChunk> {
        let first = packet.metadata.first()?;
        let nal_number = self.unwrap_nal_no(first.nal_no as u32);

        let contents = packet
            .contents()
            .map(|(meta, data)| {
                ChunkContent::received(
                    data,
                    meta.frag_no as u32,
                    meta.last_fragment,
                    meta.significance,
                    meta.dropped,
                )
            })
            .collect();

        Some(SvcChunk::new(
            first.nal_type,
            nal_number,
            first.nal_count,
            packet.command.sequence,
            contents,
        ))
    }

    /// Serial-number unwrap: a drop of more than half the modulus is a wrap,
    /// a rise of more than half is a straggler from before the last wrap.
    fn unwrap_nal_no(&mut self, wire: u32) -> u32 {
        let half = NAL_NO_MODULUS / 2;
        let Some(last) = self.last else {
            self.last = Some(wire);
            return self.base.wrapping_add(wire).wrapping_add(1);
        };

        let base = if wire < last && last - wire > half {
            self.base = self.base.wrapping_add(NAL_NO_MODULUS);
            self.wraps += 1;
            self.last = Some(wire);
            tracing::debug!(wraps = self.wraps, "NAL number wrapped");
            self.base
        } else if wire > last && wire - last > half {
            self.base.wrapping_sub(NAL_NO_MODULUS)
        } else {
            if wire > last {
                self.last = Some(wire);
            }
            self.base
        };
        base.wrapping_add(wire).wrapping_add(1)
    }
}

// ─── Reassembler ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Reassembler {
    expected: Option<u32>,
    /// Fragments received so far for the group in progress, per layer.
    pending: Vec<Vec<ChunkContent>>,
}

impl Reassembler {
    /// `initial_nal_number` pins the first expected NAL number; without it
    /// the first chunk seen sets it.
    pub fn new(initial_nal_number: Option<u32>) -> Self {
        Reassembler {
            expected: initial_nal_number,
            pending: Vec::new(),
        }
    }

    pub fn expected_nal_number(&self) -> Option<u32> {
        self.expected
    }

    /// Whether fragments of an unfinished group are held.
    pub fn in_progress(&self) -> bool {
        self.pending.iter().any(|l| !l.is_empty())
    }

    pub fn push(&mut self, chunk: SvcChunk) -> Vec<RebuildState> {
        let mut states = Vec::with_capacity(2);

        let expected = *self.expected.get_or_insert(chunk.nal_number);
        if chunk.nal_number != expected {
            tracing::warn!(expected, actual = chunk.nal_number, "NAL sequence gap");
            states.push(RebuildState::Missing {
                expected,
                actual: chunk.nal_number,
                abandoned: self.abandon(),
            });
            self.expected = Some(chunk.nal_number);
        }

        let state = match chunk.nal_type {
            NalType::NonVcl => self.rebuild_non_vcl(chunk),
            NalType::Vcl => self.collect_vcl(chunk),
        };
        states.push(state);
        states
    }

    /// End of stream: resolve a group left unfinished.
    pub fn finish(&mut self) -> Option<RebuildState> {
        if !self.in_progress() {
            return None;
        }
        Some(RebuildState::FragmentEnd(self.abandon()))
    }

    fn advance(&mut self, count: u32) {
        if let Some(expected) = self.expected.as_mut() {
            *expected = expected.wrapping_add(count);
        }
    }

    fn abandon(&mut self) -> Vec<NalResult> {
        if !self.in_progress() {
            self.pending.clear();
            return Vec::new();
        }
        self.pending
            .drain(..)
            .map(|frags| {
                if frags.is_empty() {
                    NalResult::Dropped
                } else {
                    NalResult::Lost
                }
            })
            .collect()
    }

    fn rebuild_non_vcl(&mut self, chunk: SvcChunk) -> RebuildState {
        self.advance(chunk.nal_count as u32);
        let nals = match chunk.contents.first() {
            Some(content) if !content.is_dropped() => split_annex_b(&content.payload()),
            _ => Vec::new(),
        };
        RebuildState::NalValues(nals)
    }

    fn collect_vcl(&mut self, chunk: SvcChunk) -> RebuildState {
        let layers = chunk.layer_count();
        if self.pending.len() != layers {
            self.pending.resize_with(layers, Vec::new);
        }

        for (slot, content) in self.pending.iter_mut().zip(chunk.contents) {
            if !content.is_placeholder() {
                slot.push(content);
            }
        }

        let complete = self
            .pending
            .iter()
            .all(|frags| frags.last().is_some_and(|f| f.last_fragment));
        if !complete {
            return RebuildState::Processing;
        }

        let results = self.pending.drain(..).map(rebuild_layer).collect();
        self.advance(layers as u32);
        RebuildState::FragmentEnd(results)
    }
}

fn rebuild_layer(frags: Vec<ChunkContent>) -> NalResult {
    if frags.is_empty() {
        return NalResult::Dropped;
    }

    let in_sequence = frags
        .iter()
        .enumerate()
        .all(|(k, f)| f.fragment_no == (k as u32 + 1) % FRAG_NO_MODULUS);
    if !in_sequence {
        return NalResult::Lost;
    }
    if frags.iter().any(ChunkContent::is_dropped) {
        return NalResult::Washed;
    }

    let mut data = BytesMut::with_capacity(frags.iter().map(ChunkContent::used).sum());
    for frag in &frags {
        data.extend_from_slice(&frag.payload());
    }
    match Nal::from_annex_b(data.freeze()) {
        Ok(nal) => NalResult::Nal(nal),
        Err(e) => {
            tracing::debug!(error = %e, "rebuilt layer is not a NAL unit");
            NalResult::Lost
        }
    }
}
