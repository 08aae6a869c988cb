//! # Chunker
//!
//! Pulls NAL units from a [`NalSource`] and emits [`SvcChunk`]s that fit a
//! fixed packet size.
//!
//! - Runs of non-VCL units are packed whole into a single content.
//! - VCL units are taken `layers` at a time as one layer group (base layer
//!   first). Each chunk carries one content per layer, sized by the
//!   [`SizeStrategy`] from what each layer has left. A group may span many
//!   chunks; all of them carry the group's first NAL number.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::chunk::{ChunkContent, SvcChunk};
use crate::error::ChunkError;
use crate::layers::{Layer, TemporalLayerModel, TemporalPosition, MAX_LAYERS, NON_VCL_SIGNIFICANCE};
use crate::nal::{Nal, NalSource};
use crate::strategy::SizeStrategy;
use crate::wire::{packet_overhead, NalType, MAX_CONTENT_SIZE, MAX_NAL_COUNT};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Quality layers per access unit (1..=5).
    pub layers: usize,
    /// Encoded packet ceiling, framing included.
    pub max_packet_size: usize,
    pub strategy: SizeStrategy,
    pub temporal: TemporalLayerModel,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            layers: 3,
            max_packet_size: 1500,
            strategy: SizeStrategy::default(),
            temporal: TemporalLayerModel::default(),
        }
    }
}

// ─── Layer Group ─────────────────────────────────────────────────────────────

/// Read cursor over one layer's NAL unit.
#[derive(Debug)]
struct LayerCursor {
    data: Bytes,
    offset: usize,
    fragments: u32,
}

impl LayerCursor {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

#[derive(Debug)]
struct LayerGroup {
    nal_number: u32,
    position: TemporalPosition,
    layers: Vec<LayerCursor>,
}

impl LayerGroup {
    fn drained(&self) -> bool {
        self.layers.iter().all(|l| l.remaining() == 0)
    }
}

// ─── Chunker ─────────────────────────────────────────────────────────────────

pub struct Chunker<S: NalSource> {
    source: S,
    config: ChunkerConfig,
    lookahead: VecDeque<Nal>,
    group: Option<LayerGroup>,
    /// 1-based index of the next NAL unit pulled from the source.
    next_nal_number: u32,
    /// Video units (layer groups) started so far.
    video_units: u32,
    next_sequence: u32,
}

impl<S: NalSource> Chunker<S> {
    pub fn new(source: S, mut config: ChunkerConfig) -> Self {
        config.layers = config.layers.clamp(1, MAX_LAYERS);
        Chunker {
            source,
            config,
            lookahead: VecDeque::new(),
            group: None,
            next_nal_number: 1,
            video_units: 0,
            next_sequence: 0,
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// NAL units consumed from the source so far.
    pub fn nals_consumed(&self) -> u32 {
        self.next_nal_number.wrapping_sub(1)
    }

    pub fn video_units(&self) -> u32 {
        self.video_units
    }

    /// Produce the next chunk, or `None` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<SvcChunk>, ChunkError> {
        if let Some(group) = self.group.take() {
            return self.next_vcl_chunk(group).map(Some);
        }

        let Some(nal) = self.pull() else {
            return Ok(None);
        };

        if nal.is_video() {
            let group = self.start_group(nal)?;
            self.next_vcl_chunk(group).map(Some)
        } else {
            self.pack_non_vcl(nal).map(Some)
        }
    }

    fn pull(&mut self) -> Option<Nal> {
        self.lookahead.pop_front().or_else(|| self.source.next_nal())
    }

    fn take_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    fn content_limit(&self, chunk_count: usize) -> usize {
        self.config
            .max_packet_size
            .saturating_sub(packet_overhead(chunk_count))
            .min(MAX_CONTENT_SIZE)
    }

    fn pack_non_vcl(&mut self, first: Nal) -> Result<SvcChunk, ChunkError> {
        let nal_number = self.next_nal_number;
        let limit = self.content_limit(1);
        if first.size() > limit {
            return Err(ChunkError::TooLarge {
                nal_number,
                size: first.size(),
                limit,
            });
        }

        let mut content = ChunkContent::with_capacity(limit);
        content.append(first.into_bytes())?;
        let mut count = 1u32;

        while count < MAX_NAL_COUNT {
            let Some(next) = self.pull() else {
                break;
            };
            if next.is_video() || next.size() > content.remaining() {
                self.lookahead.push_front(next);
                break;
            }
            content.append(next.into_bytes())?;
            count += 1;
        }

        content.fragment_no = 1;
        content.last_fragment = true;
        content.significance = NON_VCL_SIGNIFICANCE;
        self.next_nal_number = self.next_nal_number.wrapping_add(count);

        let sequence = self.take_sequence();
        tracing::trace!(nal_number, count, size = content.used(), sequence, "non-VCL chunk");
        Ok(SvcChunk::new(NalType::NonVcl, nal_number, count as u8, sequence, vec![content]))
    }

    fn start_group(&mut self, first: Nal) -> Result<LayerGroup, ChunkError> {
        let expected = self.config.layers;
        let nal_number = self.next_nal_number;

        let mut working = vec![first];
        while working.len() < expected {
            match self.pull() {
                Some(nal) if nal.is_video() => working.push(nal),
                other => {
                    if let Some(nal) = other {
                        self.lookahead.push_front(nal);
                    }
                    return Err(ChunkError::InsufficientLayers {
                        nal_number,
                        expected,
                        found: working.len(),
                    });
                }
            }
        }

        self.next_nal_number = self.next_nal_number.wrapping_add(expected as u32);
        self.video_units = self.video_units.wrapping_add(1);
        let position = self.config.temporal.position(self.video_units);

        Ok(LayerGroup {
            nal_number,
            position,
            layers: working
                .into_iter()
                .map(|nal| LayerCursor {
                    data: nal.into_bytes(),
                    offset: 0,
                    fragments: 0,
                })
                .collect(),
        })
    }

    fn next_vcl_chunk(&mut self, mut group: LayerGroup) -> Result<SvcChunk, ChunkError> {
        let layer_count = self.config.layers;
        let limit = self.content_limit(layer_count);

        let demand: Vec<u32> = group.layers.iter().map(|l| l.remaining() as u32).collect();
        let allocation = self.config.strategy.calculate(limit as u32, &demand);

        let mut contents = Vec::with_capacity(layer_count);
        let mut moved = 0usize;
        for (i, cursor) in group.layers.iter_mut().enumerate() {
            let take = (allocation[i] as usize).min(cursor.remaining()).min(MAX_CONTENT_SIZE);
            if take == 0 {
                contents.push(ChunkContent::placeholder());
                continue;
            }

            let mut content = ChunkContent::with_capacity(allocation[i] as usize);
            content.append(cursor.data.slice(cursor.offset..cursor.offset + take))?;
            cursor.offset += take;
            cursor.fragments += 1;

            content.fragment_no = cursor.fragments;
            content.last_fragment = cursor.remaining() == 0;
            let layer = Layer::from_index(i).unwrap_or(Layer::L4);
            content.significance = group.position.significance(layer);
            moved += take;
            contents.push(content);
        }

        if moved == 0 {
            return Err(ChunkError::Stalled {
                nal_number: group.nal_number,
            });
        }

        let nal_number = group.nal_number;
        if !group.drained() {
            self.group = Some(group);
        }
        let sequence = self.take_sequence();

        tracing::trace!(nal_number, moved, sequence, "VCL chunk");
        Ok(SvcChunk::new(NalType::Vcl, nal_number, layer_count as u8, sequence, contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nal(unit_type: u8, body: usize) -> Nal {
        let mut v = vec![0, 0, 0, 1, unit_type];
        v.extend((0..body).map(|i| (i % 251) as u8));
        Nal::from_annex_b(Bytes::from(v)).unwrap()
    }

    fn chunker(nals: Vec<Nal>, layers: usize, max_packet_size: usize, strategy: SizeStrategy) -> Chunker<VecDeque<Nal>> {
        Chunker::new(
            nals.into_iter().collect(),
            ChunkerConfig {
                layers,
                max_packet_size,
                strategy,
                temporal: TemporalLayerModel::new(1, 8),
            },
        )
    }

    fn all_chunks(c: &mut Chunker<VecDeque<Nal>>) -> Vec<SvcChunk> {
        std::iter::from_fn(|| c.next_chunk().unwrap()).collect()
    }

    #[test]
    fn non_vcl_run_packed_into_one_content() {
        let mut c = chunker(vec![nal(7, 10), nal(8, 4), nal(0x65, 20)], 1, 1500, SizeStrategy::EvenSplit);
        let chunks = all_chunks(&mut c);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].nal_type, NalType::NonVcl);
        assert_eq!(chunks[0].nal_count, 2);
        assert_eq!(chunks[0].nal_number, 1);
        assert_eq!(chunks[0].contents[0].used(), 15 + 9);
        assert_eq!(chunks[0].contents[0].significance, NON_VCL_SIGNIFICANCE);
        assert_eq!(chunks[1].nal_type, NalType::Vcl);
        assert_eq!(chunks[1].nal_number, 3);
        assert_eq!(chunks[1].sequence_number, 1);
    }

    #[test]
    fn oversized_non_vcl_is_rejected() {
        let mut c = chunker(vec![nal(7, 2000)], 1, 1500, SizeStrategy::EvenSplit);
        assert!(matches!(c.next_chunk(), Err(ChunkError::TooLarge { nal_number: 1, .. })));
    }

    #[test]
    fn layer_group_fragments_and_placeholders() {
        // Budget per packet = 100 - overhead(2) = 77 bytes.
        let mut c = chunker(vec![nal(0x65, 20), nal(0x74, 95)], 2, 100, SizeStrategy::EvenSplit);
        let chunks = all_chunks(&mut c);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert_eq!(chunk.nal_number, 1);
            assert_eq!(chunk.layer_count(), 2);
            assert!(chunk.to_packet(crate::wire::CommandBlock::forward(0)).unwrap().encoded_len() <= 100);
        }

        // Base layer fits in the first chunk, later chunks carry a placeholder for it.
        assert!(chunks[0].contents[0].last_fragment);
        assert!(chunks[1].contents[0].is_placeholder());

        let l1: Vec<u32> = chunks.iter().map(|c| c.contents[1].fragment_no).collect();
        assert_eq!(l1, (1..=chunks.len() as u32).collect::<Vec<_>>());
        assert!(chunks.last().unwrap().contents[1].last_fragment);

        let total: usize = chunks.iter().map(SvcChunk::transmitted_size).sum();
        assert_eq!(total, 25 + 100);
    }

    #[test]
    fn insufficient_layers_is_fatal() {
        let mut c = chunker(vec![nal(0x65, 10), nal(7, 3)], 2, 1500, SizeStrategy::EvenSplit);
        assert_eq!(
            c.next_chunk().unwrap_err(),
            ChunkError::InsufficientLayers {
                nal_number: 1,
                expected: 2,
                found: 1
            }
        );

        let mut c = chunker(vec![nal(0x65, 10)], 3, 1500, SizeStrategy::EvenSplit);
        assert!(matches!(c.next_chunk(), Err(ChunkError::InsufficientLayers { found: 1, .. })));
    }

    #[test]
    fn tiny_budget_stalls() {
        let mut c = chunker(vec![nal(0x65, 10)], 1, packet_overhead(1) + 2, SizeStrategy::InOrder);
        assert_eq!(c.next_chunk().unwrap_err(), ChunkError::Stalled { nal_number: 1 });
    }

    #[test]
    fn significance_follows_layer_model() {
        let mut c = chunker(vec![nal(0x65, 5), nal(0x74, 5), nal(0x61, 5), nal(0x74, 5)], 2, 1500, SizeStrategy::EvenSplit);
        let chunks = all_chunks(&mut c);
        assert_eq!(chunks.len(), 2);
        // First video unit is an I picture.
        assert_eq!(chunks[0].contents[0].significance, 2);
        assert_eq!(chunks[0].contents[1].significance, 4);
        assert_eq!(chunks[1].contents[0].significance, 3);
        assert_eq!(chunks[1].nal_number, 3);
        assert_eq!(c.video_units(), 2);
        assert_eq!(c.nals_consumed(), 4);
    }
}
