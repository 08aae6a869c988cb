//! # bpp-transport
//!
//! Washable layered-video transport for H.264 SVC over datagram networks.
//!
//! The BPP wire format carries one content per quality layer, each tagged
//! with a significance. Middleboxes under bandwidth pressure *wash* the least
//! significant contents out of a packet instead of dropping it, and the
//! receiver rebuilds as much of the stream as survives.
//!
//! ## Crate structure
//!
//! - [`wire`]: Bit-packed block header, command block, metadata blocks, packets
//! - [`nal`]: Annex-B NAL units, scanner and the `NalSource` boundary
//! - [`layers`]: Significance table and temporal layer pattern
//! - [`chunk`]: Chunk contents and SVC chunks
//! - [`strategy`]: Payload budget split between layers
//! - [`chunker`]: NAL stream to chunks
//! - [`sender`]: Sender pipeline
//! - [`reassembler`]: Chunk decoding and NAL reconstruction
//! - [`dependency`]: Quality-layer dependency tracking
//! - [`reorder`]: Resequencing window
//! - [`receiver`]: Receiver pipeline
//! - [`trim`]: In-network trimming engine
//! - [`stats`]: Pipeline statistics
//! - [`config`]: TOML configuration
//! - [`error`]: Error types

pub mod chunk;
pub mod chunker;
pub mod config;
pub mod dependency;
pub mod error;
pub mod layers;
pub mod nal;
pub mod reassembler;
pub mod receiver;
pub mod reorder;
pub mod sender;
pub mod stats;
pub mod strategy;
pub mod trim;
pub mod wire;
