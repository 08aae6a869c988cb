//! # Dependency Analyzer
//!
//! Decides which rebuilt NAL units can be handed to a decoder. Quality
//! layers are differentially coded: layer `q` needs layers `0..q` of the
//! same picture and layer `q` of the pictures it references. Once a layer is
//! washed, dropped or lost, it and every layer above it are withheld until
//! the next I picture resets all chains.

use crate::layers::{Frame, TemporalLayerModel};
use crate::nal::Nal;
use crate::reassembler::{NalResult, RebuildState};

pub struct DependencyAnalyzer {
    layer_count: usize,
    model: TemporalLayerModel,
    dropped: Vec<bool>,
    /// Quality layer the next VCL result belongs to.
    layer: usize,
    video_units: u32,
    yielded: u64,
    suppressed: u64,
    units_lost: u64,
}

impl DependencyAnalyzer {
    pub fn new(layer_count: usize, model: TemporalLayerModel) -> Self {
        let layer_count = layer_count.max(1);
        DependencyAnalyzer {
            layer_count,
            model,
            dropped: vec![false; layer_count],
            layer: 0,
            video_units: 0,
            yielded: 0,
            suppressed: 0,
            units_lost: 0,
        }
    }

    /// Units that can be decoded, in stream order.
    pub fn process(&mut self, state: RebuildState) -> Vec<Nal> {
        match state {
            RebuildState::Processing => Vec::new(),
            RebuildState::NalValues(nals) => nals
                .into_iter()
                .filter_map(|nal| self.process_result(NalResult::Nal(nal)))
                .collect(),
            RebuildState::FragmentEnd(results) => results
                .into_iter()
                .filter_map(|r| self.process_result(r))
                .collect(),
            RebuildState::Missing {
                expected,
                actual,
                abandoned,
            } => {
                // The abandoned group starts at `expected`; the rest of the
                // gap is whole groups that never arrived.
                let consumed = if abandoned.is_empty() { 0 } else { self.layer_count as u32 };
                let out = abandoned
                    .into_iter()
                    .filter_map(|r| self.process_result(r))
                    .collect();
                let gap = actual.saturating_sub(expected).saturating_sub(consumed);
                self.skip_units(gap / self.layer_count as u32);
                out
            }
        }
    }

    /// Account for video units lost in transit: every layer is gone, so
    /// nothing decodes until the next I picture.
    fn skip_units(&mut self, units: u32) {
        if units == 0 {
            return;
        }
        self.layer = 0;
        self.dropped.fill(true);
        self.video_units = self.video_units.wrapping_add(units);
        self.units_lost += units as u64;
        tracing::debug!(units, video_unit = self.video_units, "video units lost in transit");
    }

    pub fn process_result(&mut self, result: NalResult) -> Option<Nal> {
        let nal = match result {
            NalResult::Nal(nal) if !nal.is_video() => {
                self.layer = 0;
                self.yielded += 1;
                return Some(nal);
            }
            NalResult::Nal(nal) => Some(nal),
            NalResult::Washed | NalResult::Dropped | NalResult::Lost => None,
        };

        let q = self.layer;
        if q == 0 {
            self.video_units = self.video_units.wrapping_add(1);
        }
        self.layer = (q + 1) % self.layer_count;

        let Some(nal) = nal else {
            self.dropped[q] = true;
            return None;
        };

        if q == 0 && self.model.position(self.video_units).frame == Frame::I {
            self.dropped.fill(false);
        }

        if self.dropped[..=q].iter().any(|&d| d) {
            self.suppressed += 1;
            tracing::trace!(layer = q, video_unit = self.video_units, "suppressing undecodable NAL");
            None
        } else {
            self.yielded += 1;
            Some(nal)
        }
    }

    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn video_units(&self) -> u32 {
        self.video_units
    }

    /// Whole video units inferred lost from NAL-number gaps.
    pub fn units_lost(&self) -> u64 {
        self.units_lost
    }
}
