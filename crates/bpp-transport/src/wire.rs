//! # BPP Wire Format
//!
//! Bit-packed, MSB-first block layout. A packet is a block header, a command
//! block, `chunk_count` metadata blocks, then the content payloads
//! back-to-back in chunk order (no per-content length prefix; sizes come
//! from the metadata blocks).
//!
//! ## Block Header (4 bytes)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Ver  | ChunkCnt|              reserved (23)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ## Command Block (7 bytes)
//!
//! ```text
//! | Cmd(3) | Cond(3) |    Function (14)    | Thr(4) |  Sequence (32)  |
//! ```
//!
//! ## Metadata Block (6 bytes, one per chunk content)
//!
//! ```text
//! | NalCnt(5) | NalNo(12) | FragNo(5) | Size(14) | Sig(4) |D|L|T| pad(5) |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;

use crate::error::WireError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Encoded size of the block header.
pub const BLOCK_HEADER_LEN: usize = 4;

/// Encoded size of the command block.
pub const COMMAND_BLOCK_LEN: usize = 7;

/// Encoded size of one metadata block.
pub const METADATA_BLOCK_LEN: usize = 6;

/// Largest `chunk_count` the 5-bit header field can carry.
pub const MAX_CHUNK_COUNT: usize = 31;

/// Largest `nal_count` the 5-bit metadata field can carry.
pub const MAX_NAL_COUNT: u32 = 31;

/// `nal_no` is 12 bits on the wire.
pub const NAL_NO_MODULUS: u32 = 1 << 12;

/// `frag_no` is 5 bits on the wire.
pub const FRAG_NO_MODULUS: u32 = 1 << 5;

/// Largest `content_size` the 14-bit field can carry.
pub const MAX_CONTENT_SIZE: usize = (1 << 14) - 1;

/// Largest significance / threshold value (4 bits).
pub const MAX_SIGNIFICANCE: u8 = 15;

/// Bytes of framing in front of the payload for a packet with `chunk_count`
/// contents.
pub const fn packet_overhead(chunk_count: usize) -> usize {
    BLOCK_HEADER_LEN + COMMAND_BLOCK_LEN + chunk_count * METADATA_BLOCK_LEN
}

fn check_width(field: &'static str, value: u64, bits: u32) -> Result<u64, WireError> {
    if value >> bits != 0 {
        return Err(WireError::FieldOverflow { field, value, bits });
    }
    Ok(value)
}

fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

// ─── Command / Condition ─────────────────────────────────────────────────────

/// What a middlebox may do with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Command {
    /// Forward untouched.
    None = 0,
    /// Content above the threshold may be washed.
    Wash = 1,
    /// Discard the whole packet.
    Drop = 2,
}

impl Command {
    pub fn from_bits(bits: u8) -> Result<Self, WireError> {
        match bits {
            0 => Ok(Command::None),
            1 => Ok(Command::Wash),
            2 => Ok(Command::Drop),
            other => Err(WireError::InvalidCommand(other)),
        }
    }
}

/// When a `Wash` command applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Condition {
    /// Never wash.
    Never = 0,
    /// Wash whenever the bandwidth budget is exceeded.
    Always = 1,
    /// Wash on budget overrun; the command block's function may relax the
    /// threshold when a pass frees too little.
    #[serde(alias = "limited_fn")]
    LimitedFn = 2,
}

impl Condition {
    pub fn from_bits(bits: u8) -> Result<Self, WireError> {
        match bits {
            0 => Ok(Condition::Never),
            1 => Ok(Condition::Always),
            2 => Ok(Condition::LimitedFn),
            other => Err(WireError::InvalidCondition(other)),
        }
    }
}

// ─── BPP Function ────────────────────────────────────────────────────────────

const FUNCTION_NONE: u8 = 0;
const FUNCTION_RELAX_THRESHOLD: u8 = 1;

/// Decoded form of the 14-bit function field: 6-bit type, 8-bit argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BppFunction {
    None,
    /// Lower the wash threshold by `arg` for one extra trimming pass.
    RelaxThreshold(u8),
}

impl BppFunction {
    /// Raw 14-bit field value.
    pub fn to_bits(self) -> u16 {
        match self {
            BppFunction::None => (FUNCTION_NONE as u16) << 8,
            BppFunction::RelaxThreshold(arg) => ((FUNCTION_RELAX_THRESHOLD as u16) << 8) | arg as u16,
        }
    }

    pub fn from_bits(raw: u16) -> Result<Self, WireError> {
        let kind = ((raw >> 8) & 0x3F) as u8;
        match kind {
            FUNCTION_NONE => Ok(BppFunction::None),
            FUNCTION_RELAX_THRESHOLD => Ok(BppFunction::RelaxThreshold((raw & 0xFF) as u8)),
            other => Err(WireError::UnknownFunction(other)),
        }
    }
}

// ─── NAL Type Bit ────────────────────────────────────────────────────────────

/// Whether a content carries video-coding-layer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NalType {
    NonVcl = 0,
    Vcl = 1,
}

impl NalType {
    fn from_bit(bit: bool) -> Self {
        if bit {
            NalType::Vcl
        } else {
            NalType::NonVcl
        }
    }
}

// ─── Block Header ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version (4 bits).
    pub version: u8,
    /// Number of metadata blocks that follow the command block (5 bits).
    pub chunk_count: u8,
}

impl BlockHeader {
    pub fn new(chunk_count: u8) -> Self {
        BlockHeader {
            version: PROTOCOL_VERSION,
            chunk_count,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), WireError> {
        let version = check_width("version", self.version as u64, 4)?;
        let count = check_width("chunk_count", self.chunk_count as u64, 5)?;
        buf.put_u32(((version << 28) | (count << 23)) as u32);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        ensure_remaining(buf, BLOCK_HEADER_LEN)?;
        let word = buf.get_u32();
        Ok(BlockHeader {
            version: (word >> 28) as u8,
            chunk_count: ((word >> 23) & 0x1F) as u8,
        })
    }
}

// ─── Command Block ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBlock {
    pub command: Command,
    pub condition: Condition,
    /// Raw 14-bit function field; see [`CommandBlock::bpp_function`].
    pub function: u16,
    /// Contents with significance above this value are washable (4 bits).
    pub threshold: u8,
    /// Packet sequence number.
    pub sequence: u32,
}

impl CommandBlock {
    /// A command block that tells middleboxes to leave the packet alone.
    pub fn forward(sequence: u32) -> Self {
        CommandBlock {
            command: Command::None,
            condition: Condition::Never,
            function: BppFunction::None.to_bits(),
            threshold: 0,
            sequence,
        }
    }

    /// A washable command block.
    pub fn wash(condition: Condition, threshold: u8, function: BppFunction, sequence: u32) -> Self {
        CommandBlock {
            command: Command::Wash,
            condition,
            function: function.to_bits(),
            threshold,
            sequence,
        }
    }

    /// Decode the function field.
    pub fn bpp_function(&self) -> Result<BppFunction, WireError> {
        BppFunction::from_bits(self.function)
    }

    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), WireError> {
        let function = check_width("function", self.function as u64, 14)?;
        let threshold = check_width("threshold", self.threshold as u64, 4)?;
        let word = ((self.command as u64) << 53)
            | ((self.condition as u64) << 50)
            | (function << 36)
            | (threshold << 32)
            | self.sequence as u64;
        buf.put_uint(word, COMMAND_BLOCK_LEN);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        ensure_remaining(buf, COMMAND_BLOCK_LEN)?;
        let word = buf.get_uint(COMMAND_BLOCK_LEN);
        Ok(CommandBlock {
            command: Command::from_bits(((word >> 53) & 0x07) as u8)?,
            condition: Condition::from_bits(((word >> 50) & 0x07) as u8)?,
            function: ((word >> 36) & 0x3FFF) as u16,
            threshold: ((word >> 32) & 0x0F) as u8,
            sequence: word as u32,
        })
    }
}

// ─── Metadata Block ──────────────────────────────────────────────────────────

/// Per-content metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataBlock {
    /// Whole NAL units represented by the owning chunk (5 bits).
    pub nal_count: u8,
    /// Zero-based NAL index modulo 2^12.
    pub nal_no: u16,
    /// Fragment number modulo 2^5 (0 = placeholder when `content_size` is 0).
    pub frag_no: u8,
    /// Bytes of this content in the payload (14 bits).
    pub content_size: u16,
    /// Wash priority, higher is washed first (4 bits).
    pub significance: u8,
    pub dropped: bool,
    pub last_fragment: bool,
    pub nal_type: NalType,
}

impl MetadataBlock {
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), WireError> {
        let nal_count = check_width("nal_count", self.nal_count as u64, 5)?;
        let nal_no = check_width("nal_no", self.nal_no as u64, 12)?;
        let frag_no = check_width("frag_no", self.frag_no as u64, 5)?;
        let size = check_width("content_size", self.content_size as u64, 14)?;
        let significance = check_width("significance", self.significance as u64, 4)?;

        // nal_count | nal_no | frag_no form the 22-bit OFF field.
        let word = (nal_count << 43)
            | (nal_no << 31)
            | (frag_no << 26)
            | (size << 12)
            | (significance << 8)
            | ((self.dropped as u64) << 7)
            | ((self.last_fragment as u64) << 6)
            | ((self.nal_type as u64) << 5);
        buf.put_uint(word, METADATA_BLOCK_LEN);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        ensure_remaining(buf, METADATA_BLOCK_LEN)?;
        let word = buf.get_uint(METADATA_BLOCK_LEN);
        Ok(MetadataBlock {
            nal_count: ((word >> 43) & 0x1F) as u8,
            nal_no: ((word >> 31) & 0xFFF) as u16,
            frag_no: ((word >> 26) & 0x1F) as u8,
            content_size: ((word >> 12) & 0x3FFF) as u16,
            significance: ((word >> 8) & 0x0F) as u8,
            dropped: (word >> 7) & 1 == 1,
            last_fragment: (word >> 6) & 1 == 1,
            nal_type: NalType::from_bit((word >> 5) & 1 == 1),
        })
    }
}

// ─── Full Packet ─────────────────────────────────────────────────────────────

/// A complete BPP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: BlockHeader,
    pub command: CommandBlock,
    pub metadata: Vec<MetadataBlock>,
    /// Concatenated content payloads, in metadata order.
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet; the header's chunk count follows `metadata`.
    pub fn new(command: CommandBlock, metadata: Vec<MetadataBlock>, payload: Bytes) -> Result<Self, WireError> {
        let count = check_width("chunk_count", metadata.len() as u64, 5)?;
        Ok(Packet {
            header: BlockHeader::new(count as u8),
            command,
            metadata,
            payload,
        })
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        packet_overhead(self.metadata.len()) + self.payload.len()
    }

    /// Sum of the `content_size` fields.
    pub fn declared_payload_len(&self) -> usize {
        self.metadata.iter().map(|m| m.content_size as usize).sum()
    }

    /// Serialize the whole packet.
    pub fn encode(&self) -> Result<BytesMut, WireError> {
        if self.header.chunk_count as usize != self.metadata.len() {
            return Err(WireError::ChunkCountMismatch {
                header: self.header.chunk_count as usize,
                actual: self.metadata.len(),
            });
        }
        let declared = self.declared_payload_len();
        if declared != self.payload.len() {
            return Err(WireError::PayloadLengthMismatch {
                declared,
                actual: self.payload.len(),
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.header.encode(&mut buf)?;
        self.command.encode(&mut buf)?;
        for meta in &self.metadata {
            meta.encode(&mut buf)?;
        }
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a complete packet. Trailing bytes past the declared contents are
    /// ignored.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        let (header, command) = Self::decode_prefix(buf)?;

        let count = header.chunk_count as usize;
        ensure_remaining(buf, count * METADATA_BLOCK_LEN)?;
        let mut metadata = Vec::with_capacity(count);
        for _ in 0..count {
            metadata.push(MetadataBlock::decode(buf)?);
        }

        let declared: usize = metadata.iter().map(|m| m.content_size as usize).sum();
        ensure_remaining(buf, declared)?;
        let payload = buf.copy_to_bytes(declared);

        Ok(Packet {
            header,
            command,
            metadata,
            payload,
        })
    }

    /// Decode only the block header and command block.
    pub fn decode_prefix(buf: &mut impl Buf) -> Result<(BlockHeader, CommandBlock), WireError> {
        let header = BlockHeader::decode(buf)?;
        if header.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(header.version));
        }
        let command = CommandBlock::decode(buf)?;
        Ok((header, command))
    }

    /// Iterate `(metadata, content bytes)` pairs. Slicing is zero-copy.
    pub fn contents(&self) -> impl Iterator<Item = (&MetadataBlock, Bytes)> + '_ {
        let mut offset = 0usize;
        self.metadata.iter().map(move |meta| {
            let end = (offset + meta.content_size as usize).min(self.payload.len());
            let slice = self.payload.slice(offset.min(end)..end);
            offset = end;
            (meta, slice)
        })
    }
}
