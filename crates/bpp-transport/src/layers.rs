//! # Significance & Layer Models
//!
//! Static lookup tables that turn a picture's position in the layered
//! structure into a wash priority, and the rolling temporal pattern that
//! gives each video unit its frame type and temporal layer.
//!
//! Significance is a drop order: the trimmer washes contents whose
//! significance is *above* the packet threshold, so larger numbers are
//! discarded first. Parameter sets sit at [`NON_VCL_SIGNIFICANCE`].

use crate::wire::MAX_SIGNIFICANCE;

/// Maximum number of quality layers carried in one chunk.
pub const MAX_LAYERS: usize = 5;

/// Significance assigned to every non-VCL content.
pub const NON_VCL_SIGNIFICANCE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    I,
    P,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Temporal {
    T0,
    T1,
    T2,
    T3,
    T4,
}

impl Temporal {
    const ALL: [Temporal; 5] = [Temporal::T0, Temporal::T1, Temporal::T2, Temporal::T3, Temporal::T4];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    L0,
    L1,
    L2,
    L3,
    L4,
}

impl Layer {
    const ALL: [Layer; MAX_LAYERS] = [Layer::L0, Layer::L1, Layer::L2, Layer::L3, Layer::L4];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

// ─── Significance Model ──────────────────────────────────────────────────────

/// `[frame][temporal][layer]`. Higher temporal layers and higher quality
/// layers have fewer dependents, so they wash first.
static SIGNIFICANCE: [[[u8; MAX_LAYERS]; 5]; 2] = [
    // I
    [
        [2, 4, 6, 8, 10],
        [3, 5, 7, 9, 11],
        [4, 6, 8, 10, 12],
        [5, 7, 9, 11, 13],
        [6, 8, 10, 12, 14],
    ],
    // P
    [
        [3, 5, 7, 9, 11],
        [4, 6, 8, 10, 12],
        [5, 7, 9, 11, 13],
        [6, 8, 10, 12, 14],
        [7, 9, 11, 13, 15],
    ],
];

/// Table lookup for one content.
pub fn significance(frame: Frame, temporal: Temporal, layer: Layer) -> u8 {
    SIGNIFICANCE[frame as usize][temporal as usize][layer as usize]
}

// ─── Temporal Layer Model ────────────────────────────────────────────────────

/// Where one video unit sits in the coding pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalPosition {
    pub frame: Frame,
    pub temporal: Temporal,
    /// Significance bias: pictures in the back half of an intra period have
    /// fewer frames depending on them before the next refresh.
    pub adjustment: u8,
}

impl TemporalPosition {
    /// Table significance plus this position's adjustment, clamped to 4 bits.
    pub fn significance(&self, layer: Layer) -> u8 {
        significance(self.frame, self.temporal, layer)
            .saturating_add(self.adjustment)
            .min(MAX_SIGNIFICANCE)
    }
}

/// Rolling low-delay hierarchical-P pattern: an I picture every
/// `intra_period` units, dyadic temporal layering inside groups of
/// `2^(temporal_levels-1)` pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalLayerModel {
    temporal_levels: u8,
    intra_period: u32,
}

impl TemporalLayerModel {
    /// `temporal_levels` is clamped to `1..=5`, `intra_period` to at least 1.
    pub fn new(temporal_levels: u8, intra_period: u32) -> Self {
        TemporalLayerModel {
            temporal_levels: temporal_levels.clamp(1, 5),
            intra_period: intra_period.max(1),
        }
    }

    pub fn temporal_levels(&self) -> u8 {
        self.temporal_levels
    }

    pub fn intra_period(&self) -> u32 {
        self.intra_period
    }

    /// Pattern entry for a 1-based video unit index.
    pub fn position(&self, index: u32) -> TemporalPosition {
        let in_period = index.saturating_sub(1) % self.intra_period;
        let adjustment = u8::from(in_period * 2 >= self.intra_period && in_period != 0);

        if in_period == 0 {
            return TemporalPosition {
                frame: Frame::I,
                temporal: Temporal::T0,
                adjustment,
            };
        }

        let gop = 1u32 << (self.temporal_levels - 1);
        let pos = in_period % gop;
        let level = if pos == 0 {
            0
        } else {
            (self.temporal_levels as u32 - 1).saturating_sub(pos.trailing_zeros())
        };

        TemporalPosition {
            frame: Frame::P,
            temporal: Temporal::from_index(level as usize).unwrap_or(Temporal::T4),
            adjustment,
        }
    }
}

impl Default for TemporalLayerModel {
    fn default() -> Self {
        TemporalLayerModel::new(3, 16)
    }
}
