//! # Reorder Window
//!
//! Optional resequencing in front of the reassembler. Packets are keyed by
//! their 32-bit command-block sequence (unwrapped to 64 bits) and held until
//! either they are next in line or the window overflows.

use std::collections::BTreeMap;

/// Extends 32-bit wrapping sequence numbers to a monotonic 64-bit space.
#[derive(Debug, Default)]
struct SequenceUnwrapper {
    highest: Option<u64>,
}

impl SequenceUnwrapper {
    fn unwrap(&mut self, seq: u32) -> u64 {
        let Some(highest) = self.highest else {
            self.highest = Some(seq as u64);
            return seq as u64;
        };
        let delta = seq.wrapping_sub(highest as u32) as i32 as i64;
        let ext = (highest as i64 + delta).max(0) as u64;
        if ext > highest {
            self.highest = Some(ext);
        }
        ext
    }
}

pub struct ReorderBuffer<T> {
    window: usize,
    held: BTreeMap<u64, T>,
    /// Highest sequence released so far.
    released: Option<u64>,
    unwrapper: SequenceUnwrapper,
    late: u64,
    duplicates: u64,
}

impl<T> ReorderBuffer<T> {
    /// `window` = 0 turns the buffer into a pass-through.
    pub fn new(window: usize) -> Self {
        ReorderBuffer {
            window,
            held: BTreeMap::new(),
            released: None,
            unwrapper: SequenceUnwrapper::default(),
            late: 0,
            duplicates: 0,
        }
    }

    /// Insert an item; returns the items now releasable, in sequence order.
    pub fn push(&mut self, seq: u32, item: T) -> Vec<T> {
        if self.window == 0 {
            return vec![item];
        }

        let key = self.unwrapper.unwrap(seq);
        if self.released.is_some_and(|r| key <= r) {
            self.late += 1;
            tracing::debug!(seq, "late packet discarded");
            return Vec::new();
        }
        if self.held.contains_key(&key) {
            self.duplicates += 1;
            return Vec::new();
        }
        self.held.insert(key, item);

        let mut out = Vec::new();
        while let Some(&next) = self.held.keys().next() {
            let in_line = self.released.is_some_and(|r| next == r + 1);
            if !in_line && self.held.len() <= self.window {
                break;
            }
            if let Some(item) = self.held.remove(&next) {
                out.push(item);
            }
            self.released = Some(next);
        }
        out
    }

    /// Release everything held, in order. Used at end of stream.
    pub fn flush(&mut self) -> Vec<T> {
        let held = std::mem::take(&mut self.held);
        if let Some(&last) = held.keys().next_back() {
            self.released = Some(last);
        }
        held.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn late(&self) -> u64 {
        self.late
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}
