//! # NAL Units
//!
//! Annex-B framed H.264 NAL units and the source boundary the chunker pulls
//! from. Only the unit type is inspected, enough to tell video-coding-layer
//! (VCL) units from parameter sets and other non-VCL units.
//!
//! A [`Nal`] keeps its start code: the bytes on the wire are exactly the
//! bytes of the elementary stream, so concatenating reassembled units
//! reproduces the original stream.

use std::collections::VecDeque;
use std::io::Read;

use bytes::Bytes;

use crate::error::NalError;
use crate::wire::NalType;

/// H.264 NAL unit types that carry coded picture data.
const VCL_TYPES: [u8; 8] = [1, 2, 3, 4, 5, 19, 20, 21];

/// Locate a start code at `data[0..]`. Returns its length (3 or 4).
fn start_code_len(data: &[u8]) -> Option<usize> {
    match data {
        [0, 0, 1, ..] => Some(3),
        [0, 0, 0, 1, ..] => Some(4),
        _ => None,
    }
}

/// One Annex-B NAL unit, start code included.
#[derive(Clone, PartialEq, Eq)]
pub struct Nal {
    data: Bytes,
    marker_size: usize,
}

impl Nal {
    /// Wrap a byte run that begins with a 3- or 4-byte start code.
    pub fn from_annex_b(data: Bytes) -> Result<Self, NalError> {
        if data.is_empty() {
            return Err(NalError::Empty);
        }
        let marker_size = start_code_len(&data).ok_or(NalError::MissingStartCode)?;
        if data.len() <= marker_size {
            return Err(NalError::Empty);
        }
        Ok(Nal { data, marker_size })
    }

    /// Total size including the start code.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Start code length (3 or 4).
    pub fn marker_size(&self) -> usize {
        self.marker_size
    }

    /// `nal_unit_type` from the header byte after the start code.
    pub fn unit_type(&self) -> u8 {
        self.data[self.marker_size] & 0x1F
    }

    pub fn is_video(&self) -> bool {
        VCL_TYPES.contains(&self.unit_type())
    }

    pub fn nal_type(&self) -> NalType {
        if self.is_video() {
            NalType::Vcl
        } else {
            NalType::NonVcl
        }
    }

    /// Raw bytes, start code included.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for Nal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nal")
            .field("type", &self.unit_type())
            .field("size", &self.size())
            .field("marker", &self.marker_size)
            .finish()
    }
}

/// Split an Annex-B byte stream into NAL units.
///
/// Start codes are `00 00 01` or `00 00 00 01`; a zero byte directly in front
/// of a 3-byte code is taken as part of a 4-byte code. Bytes before the first
/// start code are skipped.
pub fn split_annex_b(data: &Bytes) -> Vec<Nal> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let begin = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            starts.push(begin);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (idx, &begin) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(data.len());
        match Nal::from_annex_b(data.slice(begin..end)) {
            Ok(nal) => nals.push(nal),
            Err(e) => tracing::debug!(offset = begin, error = %e, "skipping empty NAL unit"),
        }
    }
    nals
}

// ─── NAL Source ──────────────────────────────────────────────────────────────

/// Producer of NAL units in stream order. `None` is end of stream.
pub trait NalSource {
    fn next_nal(&mut self) -> Option<Nal>;
}

impl NalSource for VecDeque<Nal> {
    fn next_nal(&mut self) -> Option<Nal> {
        self.pop_front()
    }
}

/// NAL source over an in-memory Annex-B elementary stream.
pub struct AnnexBSource {
    nals: std::vec::IntoIter<Nal>,
}

impl AnnexBSource {
    pub fn new(data: Bytes) -> Self {
        AnnexBSource {
            nals: split_annex_b(&data).into_iter(),
        }
    }

    /// Read a whole elementary stream (e.g. an `.h264` file).
    pub fn from_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Self::new(Bytes::from(data)))
    }

    /// Units not yet handed out.
    pub fn remaining(&self) -> usize {
        self.nals.len()
    }
}

impl NalSource for AnnexBSource {
    fn next_nal(&mut self) -> Option<Nal> {
        self.nals.next()
    }
}
