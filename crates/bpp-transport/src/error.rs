//! # Error Types
//!
//! Hard failures only. Sequencing gaps, lost fragments and washed content are
//! ordinary data on the receive path (see [`crate::reassembler`]) and never
//! show up here.

use thiserror::Error;

/// Malformed or unrepresentable wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer truncated: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid command value {0}")]
    InvalidCommand(u8),

    #[error("invalid condition value {0}")]
    InvalidCondition(u8),

    #[error("unknown BPP function type {0}")]
    UnknownFunction(u8),

    #[error("field `{field}` value {value} does not fit in {bits} bits")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    #[error("chunk count mismatch: header says {header}, packet carries {actual}")]
    ChunkCountMismatch { header: usize, actual: usize },

    #[error("payload is {actual} bytes, metadata declares {declared}")]
    PayloadLengthMismatch { declared: usize, actual: usize },
}

/// Failures while splitting an Annex-B byte stream into NAL units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NalError {
    #[error("empty NAL unit")]
    Empty,

    #[error("NAL unit does not start with a 3- or 4-byte start code")]
    MissingStartCode,
}

/// Sender-side chunking failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The source could not supply `expected` consecutive VCL units for one
    /// layer group. The stream cannot be chunked with this layer count.
    #[error("layer group starting at NAL {nal_number} needs {expected} VCL units, source provided {found}")]
    InsufficientLayers {
        nal_number: u32,
        expected: usize,
        found: usize,
    },

    #[error("NAL {nal_number} is {size} bytes, container limit is {limit}")]
    TooLarge {
        nal_number: u32,
        size: usize,
        limit: usize,
    },

    #[error("append of {requested} bytes exceeds remaining capacity {available}")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("size strategy allocated no bytes for layer group at NAL {nal_number}")]
    Stalled { nal_number: u32 },

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Failures producing a wire packet on the send path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("encoded packet is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Configuration loading / validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
