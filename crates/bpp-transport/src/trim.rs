//! # Trimming Engine
//!
//! In-network, per-packet wash decisions against a one-second byte budget.
//!
//! Each packet is checked against `ideal = max(packet_len, bytes_per_sec ×
//! elapsed_fraction)`. When more than `ideal` has already gone out this
//! second and the packet is washable, contents above the packet's
//! significance threshold are washed (highest chunk index first) until the
//! overrun is covered, and a shorter packet is re-serialized. Untouched
//! packets are forwarded as-is.
//!
//! The bandwidth target is shared through [`BandwidthControl`] so a
//! management thread can retune it while the forwarding loop runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quanta::{Clock, Instant};

use crate::error::WireError;
use crate::stats::TrimStats;
use crate::wire::{BppFunction, Command, Condition, MetadataBlock, Packet};

/// A pass that leaves more than this many bytes of the target uncovered may
/// trigger threshold relaxation.
pub const EVALUATION_FLOOR: u32 = 100;

const WINDOW: Duration = Duration::from_secs(1);

// ─── Bandwidth Control ───────────────────────────────────────────────────────

/// Shared target bandwidth in bits per second.
#[derive(Debug, Clone)]
pub struct BandwidthControl {
    bps: Arc<AtomicU64>,
}

impl BandwidthControl {
    pub fn new(bps: u64) -> Self {
        BandwidthControl {
            bps: Arc::new(AtomicU64::new(bps)),
        }
    }

    pub fn bandwidth(&self) -> u64 {
        self.bps.load(Ordering::Relaxed)
    }

    /// Set a new target; returns the previous one.
    pub fn adjust_bandwidth(&self, new_bps: u64) -> u64 {
        let old = self.bps.swap(new_bps, Ordering::Relaxed);
        tracing::info!(old_bps = old, new_bps, "bandwidth adjusted");
        old
    }
}

// ─── Policies ────────────────────────────────────────────────────────────────

/// Budget snapshot a policy works from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimState {
    pub bytes_per_sec: f64,
    /// Elapsed share of the current one-second window, `0.0..1.0`.
    pub fraction: f64,
    /// Bytes forwarded so far in this window.
    pub sent: u64,
    pub packet_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TrimPolicy {
    /// Trim whenever the window's budget is overrun.
    #[default]
    Basic,
    /// Never trim in the first `period` of each window.
    NoTrimBeforePeriod { period: f64 },
    /// Inflate the budget by `1 + extra` during the first `period`.
    Optimistic { period: f64, extra: f64 },
}

impl TrimPolicy {
    /// Budget headroom in bytes: `ideal - sent`. Negative when over budget.
    pub fn calculate_below(&self, state: &TrimState) -> i64 {
        let mut budget = state.bytes_per_sec * state.fraction;
        if let TrimPolicy::Optimistic { period, extra } = *self {
            if state.fraction < period {
                budget *= 1.0 + extra;
            }
        }
        let ideal = budget.max(state.packet_len as f64) as i64;
        ideal - state.sent as i64
    }

    /// Bytes to wash from the current packet.
    pub fn calculate_trim_amount(&self, behind: i64, state: &TrimState) -> u32 {
        if let TrimPolicy::NoTrimBeforePeriod { period } = *self {
            if state.fraction < period {
                return 0;
            }
        }
        if behind >= 0 {
            0
        } else {
            behind.unsigned_abs().min(u32::MAX as u64) as u32
        }
    }
}

// ─── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimDecision {
    /// Send the packet unchanged.
    Forward,
    /// Send this shorter packet instead.
    Replace(Bytes),
    /// Discard the packet.
    Drop,
}

impl TrimDecision {
    /// Bytes to put on the wire, if any.
    pub fn apply(self, original: Bytes) -> Option<Bytes> {
        match self {
            TrimDecision::Forward => Some(original),
            TrimDecision::Replace(trimmed) => Some(trimmed),
            TrimDecision::Drop => None,
        }
    }
}

// ─── Trimmer ─────────────────────────────────────────────────────────────────

pub struct Trimmer {
    policy: TrimPolicy,
    control: BandwidthControl,
    clock: Clock,
    window_start: Instant,
    sent: u64,
    stats: TrimStats,
}

impl Trimmer {
    pub fn new(control: BandwidthControl, policy: TrimPolicy) -> Self {
        Self::with_clock(control, policy, Clock::new())
    }

    /// Use a specific clock (e.g. `Clock::mock()` in tests).
    pub fn with_clock(control: BandwidthControl, policy: TrimPolicy, clock: Clock) -> Self {
        let window_start = clock.now();
        Trimmer {
            policy,
            control,
            clock,
            window_start,
            sent: 0,
            stats: TrimStats {
                windows: 1,
                ..Default::default()
            },
        }
    }

    pub fn control(&self) -> &BandwidthControl {
        &self.control
    }

    pub fn stats(&self) -> &TrimStats {
        &self.stats
    }

    /// Bytes forwarded in the current window.
    pub fn sent_this_window(&self) -> u64 {
        self.sent
    }

    pub fn process(&mut self, packet: Bytes) -> Result<TrimDecision, WireError> {
        self.stats.packets_in += 1;
        self.stats.bytes_in += packet.len() as u64;

        let fraction = self.roll_window();

        let (_, command) = match Packet::decode_prefix(&mut packet.clone()) {
            Ok(prefix) => prefix,
            Err(e) => {
                self.stats.decode_errors += 1;
                return Err(e);
            }
        };

        let target = match (command.command, command.condition) {
            (Command::Drop, _) => {
                self.stats.packets_dropped += 1;
                tracing::debug!(seq = command.sequence, "drop command");
                return Ok(TrimDecision::Drop);
            }
            (Command::None, _) | (Command::Wash, Condition::Never) => 0,
            (Command::Wash, _) => {
                let state = TrimState {
                    bytes_per_sec: self.control.bandwidth() as f64 / 8.0,
                    fraction,
                    sent: self.sent,
                    packet_len: packet.len(),
                };
                let behind = self.policy.calculate_below(&state);
                self.policy.calculate_trim_amount(behind, &state)
            }
        };

        if target == 0 {
            return Ok(self.forward(packet.len()));
        }

        let decoded = match Packet::decode(&mut packet.clone()) {
            Ok(p) => p,
            Err(e) => {
                self.stats.decode_errors += 1;
                return Err(e);
            }
        };
        match self.trim(decoded, target)? {
            Some(trimmed) => {
                let washed = packet.len() - trimmed.len();
                self.sent += trimmed.len() as u64;
                self.stats.packets_trimmed += 1;
                self.stats.bytes_out += trimmed.len() as u64;
                self.stats.bytes_washed += washed as u64;
                tracing::debug!(seq = command.sequence, target, washed, "packet trimmed");
                Ok(TrimDecision::Replace(trimmed))
            }
            None => Ok(self.forward(packet.len())),
        }
    }

    /// Elapsed fraction of the current window, rolling it if a second passed.
    fn roll_window(&mut self) -> f64 {
        let now = self.clock.now();
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= WINDOW {
            tracing::trace!(sent = self.sent, "budget window rolled");
            self.window_start = now;
            self.sent = 0;
            self.stats.windows += 1;
            return 0.0;
        }
        elapsed.as_secs_f64() / WINDOW.as_secs_f64()
    }

    fn forward(&mut self, len: usize) -> TrimDecision {
        self.sent += len as u64;
        self.stats.packets_forwarded += 1;
        self.stats.bytes_out += len as u64;
        TrimDecision::Forward
    }

    /// Wash contents until `target` bytes are freed. `None` if nothing could
    /// be washed.
    fn trim(&mut self, packet: Packet, target: u32) -> Result<Option<Bytes>, WireError> {
        let contents: Vec<Bytes> = packet.contents().map(|(_, data)| data).collect();
        let mut metadata = packet.metadata;
        let command = packet.command;

        let mut threshold = command.threshold;
        let mut freed = wash_pass(&mut metadata, threshold, target, 0);

        let short = target.saturating_sub(freed);
        if short > EVALUATION_FLOOR && command.condition == Condition::LimitedFn {
            if let Ok(BppFunction::RelaxThreshold(step)) = command.bpp_function() {
                threshold = threshold.saturating_sub(step);
                self.stats.relaxations += 1;
                tracing::debug!(seq = command.sequence, short, threshold, "relaxing wash threshold");
                freed = wash_pass(&mut metadata, threshold, target, freed);
            }
        }

        if freed == 0 {
            return Ok(None);
        }

        let mut payload = Vec::with_capacity(packet.payload.len() - freed as usize);
        for (meta, data) in metadata.iter_mut().zip(&contents) {
            if meta.dropped {
                if meta.content_size > 0 {
                    self.stats.contents_washed += 1;
                }
                meta.content_size = 0;
            } else {
                payload.extend_from_slice(data);
            }
        }

        let rebuilt = Packet::new(command, metadata, Bytes::from(payload))?;
        Ok(Some(rebuilt.encode()?.freeze()))
    }
}

/// Mark contents dropped from the last one back. Returns the running total
/// of bytes freed.
fn wash_pass(metadata: &mut [MetadataBlock], threshold: u8, target: u32, mut freed: u32) -> u32 {
    for meta in metadata.iter_mut().rev() {
        if freed >= target {
            break;
        }
        if meta.significance > threshold && !meta.dropped && meta.content_size > 0 {
            meta.dropped = true;
            freed += meta.content_size as u32;
        }
    }
    freed
}
