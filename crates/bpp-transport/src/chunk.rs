//! # SVC Chunks
//!
//! The unit a packet carries: one content per quality layer (or a single
//! content of packed non-VCL units). Contents hold their bytes as zero-copy
//! slices of the source NAL units.

use bytes::{Bytes, BytesMut};

use crate::error::{ChunkError, WireError};
use crate::wire::{
    CommandBlock, MetadataBlock, NalType, Packet, FRAG_NO_MODULUS, MAX_CONTENT_SIZE,
    NAL_NO_MODULUS,
};

// ─── Chunk Content ───────────────────────────────────────────────────────────

/// One payload slot of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkContent {
    capacity: usize,
    used: usize,
    segments: Vec<Bytes>,
    /// 1-based fragment index within the NAL; 0 marks a placeholder.
    pub fragment_no: u32,
    pub last_fragment: bool,
    pub significance: u8,
    dropped: bool,
}

impl ChunkContent {
    pub fn with_capacity(capacity: usize) -> Self {
        ChunkContent {
            capacity,
            ..Default::default()
        }
    }

    /// An empty slot for a layer with nothing to send in this chunk.
    pub fn placeholder() -> Self {
        ChunkContent::default()
    }

    /// A content as read off the wire. Capacity equals its size.
    pub fn received(data: Bytes, fragment_no: u32, last_fragment: bool, significance: u8, dropped: bool) -> Self {
        let used = data.len();
        let segments = if data.is_empty() { Vec::new() } else { vec![data] };
        ChunkContent {
            capacity: used,
            used,
            segments,
            fragment_no,
            last_fragment,
            significance,
            dropped,
        }
    }

    /// Append bytes. Fails without modifying the content if they don't fit.
    pub fn append(&mut self, data: Bytes) -> Result<(), ChunkError> {
        if data.len() > self.remaining() {
            return Err(ChunkError::CapacityExceeded {
                requested: data.len(),
                available: self.remaining(),
            });
        }
        if !data.is_empty() {
            self.used += data.len();
            self.segments.push(data);
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Bytes this content occupies on the wire.
    pub fn transmitted_size(&self) -> usize {
        if self.dropped {
            0
        } else {
            self.used
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub fn is_placeholder(&self) -> bool {
        self.fragment_no == 0 && self.used == 0 && !self.dropped
    }

    /// Content bytes. Single-segment contents are returned without copying.
    pub fn payload(&self) -> Bytes {
        match self.segments.as_slice() {
            [] => Bytes::new(),
            [one] => one.clone(),
            many => {
                let mut buf = BytesMut::with_capacity(self.used);
                for seg in many {
                    buf.extend_from_slice(seg);
                }
                buf.freeze()
            }
        }
    }

    fn write_to(&self, buf: &mut BytesMut) {
        if self.dropped {
            return;
        }
        for seg in &self.segments {
            buf.extend_from_slice(seg);
        }
    }
}

// ─── SVC Chunk ───────────────────────────────────────────────────────────────

/// A group of contents sharing one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvcChunk {
    /// One per quality layer; fixed length for the chunk's lifetime.
    pub contents: Vec<ChunkContent>,
    pub nal_type: NalType,
    /// 1-based stream index of the first NAL unit this chunk represents.
    pub nal_number: u32,
    /// NAL units represented (layer count for VCL chunks).
    pub nal_count: u8,
    pub sequence_number: u32,
}

impl SvcChunk {
    pub fn new(nal_type: NalType, nal_number: u32, nal_count: u8, sequence_number: u32, contents: Vec<ChunkContent>) -> Self {
        SvcChunk {
            contents,
            nal_type,
            nal_number,
            nal_count,
            sequence_number,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.contents.len()
    }

    /// Payload bytes on the wire.
    pub fn transmitted_size(&self) -> usize {
        self.contents.iter().map(ChunkContent::transmitted_size).sum()
    }

    /// Frame the chunk as a wire packet. Layer `i` of a VCL chunk is NAL
    /// `nal_number + i`; the wire carries zero-based indices modulo 2^12.
    pub fn to_packet(&self, command: CommandBlock) -> Result<Packet, WireError> {
        let mut payload = BytesMut::with_capacity(self.transmitted_size());
        let mut metadata = Vec::with_capacity(self.contents.len());

        for (i, content) in self.contents.iter().enumerate() {
            let size = content.transmitted_size();
            if size > MAX_CONTENT_SIZE {
                return Err(WireError::FieldOverflow {
                    field: "content_size",
                    value: size as u64,
                    bits: 14,
                });
            }
            let offset = match self.nal_type {
                NalType::Vcl => i as u32,
                NalType::NonVcl => 0,
            };
            let index = self.nal_number.wrapping_sub(1).wrapping_add(offset);
            metadata.push(MetadataBlock {
                nal_count: self.nal_count,
                nal_no: (index % NAL_NO_MODULUS) as u16,
                frag_no: (content.fragment_no % FRAG_NO_MODULUS) as u8,
                content_size: size as u16,
                significance: content.significance,
                dropped: content.is_dropped(),
                last_fragment: content.last_fragment,
                nal_type: self.nal_type,
            });
            content.write_to(&mut payload);
        }

        let mut command = command;
        command.sequence = self.sequence_number;
        Packet::new(command, metadata, payload.freeze())
    }
}
