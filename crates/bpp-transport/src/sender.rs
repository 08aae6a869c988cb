//! # Sender Pipeline
//!
//! Pure logic, no I/O. Drives the [`Chunker`] and turns each chunk into an
//! encoded packet ready for the network layer.
//!
//! VCL packets carry the configured command block (normally a `Wash` so
//! middleboxes may trim enhancement layers); non-VCL packets always carry a
//! `None` command so parameter sets are never washed.

use bytes::Bytes;

use crate::chunker::{Chunker, ChunkerConfig};
use crate::error::SendError;
use crate::nal::NalSource;
use crate::stats::SenderStats;
use crate::wire::{BppFunction, Command, CommandBlock, Condition, NalType};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub chunker: ChunkerConfig,
    /// Command stamped on VCL packets.
    pub command: Command,
    pub condition: Condition,
    /// Contents with significance above this are washable.
    pub threshold: u8,
    pub function: BppFunction,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            chunker: ChunkerConfig::default(),
            command: Command::Wash,
            condition: Condition::Always,
            threshold: 2,
            function: BppFunction::None,
        }
    }
}

impl SenderConfig {
    fn command_block(&self, nal_type: NalType, sequence: u32) -> CommandBlock {
        match nal_type {
            NalType::NonVcl => CommandBlock::forward(sequence),
            NalType::Vcl => CommandBlock {
                command: self.command,
                condition: self.condition,
                function: self.function.to_bits(),
                threshold: self.threshold,
                sequence,
            },
        }
    }
}

// ─── Output Packet ───────────────────────────────────────────────────────────

/// An encoded packet ready to send.
#[derive(Debug, Clone)]
pub struct OutputPacket {
    pub data: Bytes,
    pub sequence: u32,
    /// First NAL number the packet carries.
    pub nal_number: u32,
    pub nal_type: NalType,
}

// ─── Sender ──────────────────────────────────────────────────────────────────

pub struct Sender<S: NalSource> {
    config: SenderConfig,
    chunker: Chunker<S>,
    stats: SenderStats,
}

impl<S: NalSource> Sender<S> {
    pub fn new(source: S, config: SenderConfig) -> Self {
        let chunker = Chunker::new(source, config.chunker.clone());
        Sender {
            config,
            chunker,
            stats: SenderStats::new(),
        }
    }

    /// Chunk and encode the next packet. `None` at end of stream.
    pub fn next_packet(&mut self) -> Result<Option<OutputPacket>, SendError> {
        let Some(chunk) = self.chunker.next_chunk()? else {
            return Ok(None);
        };

        let command = self.config.command_block(chunk.nal_type, chunk.sequence_number);
        let packet = chunk.to_packet(command)?;
        let data = packet.encode()?.freeze();

        let limit = self.config.chunker.max_packet_size;
        if data.len() > limit {
            return Err(SendError::TooLarge {
                size: data.len(),
                limit,
            });
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += data.len() as u64;
        self.stats.payload_bytes += packet.payload.len() as u64;
        match chunk.nal_type {
            NalType::Vcl => self.stats.vcl_chunks += 1,
            NalType::NonVcl => self.stats.non_vcl_chunks += 1,
        }
        self.stats.placeholders += chunk.contents.iter().filter(|c| c.is_placeholder()).count() as u64;
        self.stats.nals_consumed = self.chunker.nals_consumed() as u64;
        self.stats.video_units = self.chunker.video_units() as u64;

        tracing::debug!(
            seq = chunk.sequence_number,
            nal_number = chunk.nal_number,
            nal_type = ?chunk.nal_type,
            len = data.len(),
            "packet"
        );

        Ok(Some(OutputPacket {
            data,
            sequence: chunk.sequence_number,
            nal_number: chunk.nal_number,
            nal_type: chunk.nal_type,
        }))
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }
}

impl<S: NalSource> Iterator for Sender<S> {
    type Item = Result<OutputPacket, SendError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}
