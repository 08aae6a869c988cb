//! # Configuration
//!
//! TOML-driven settings for all three roles. Parsing happens in two stages:
//! every field of the `*Input` structs is optional, and `resolve()` applies
//! defaults and validates ranges into the concrete pipeline configs.
//!
//! ```toml
//! version = 1
//!
//! [stream]
//! layers = 3
//! temporal_levels = 3
//! intra_period = 16
//! max_packet_size = 1400
//!
//! [sender]
//! strategy = "dynamic-split"
//! command = "wash"
//! condition = "limited-fn"
//! threshold = 4
//! relax_step = 2
//!
//! [receiver]
//! reorder_window = 8
//!
//! [trimmer]
//! bandwidth_bps = 2000000
//! policy = "optimistic"
//! period = 0.25
//! extra = 0.5
//! ```

use serde::Deserialize;

use crate::chunker::ChunkerConfig;
use crate::error::ConfigError;
use crate::layers::{TemporalLayerModel, MAX_LAYERS};
use crate::receiver::ReceiverConfig;
use crate::sender::SenderConfig;
use crate::strategy::{SizeStrategy, MIN_FRAGMENT_SIZE};
use crate::trim::TrimPolicy;
use crate::wire::{packet_overhead, BppFunction, Command, Condition, MAX_SIGNIFICANCE};

pub const CONFIG_VERSION: u32 = 1;

// ─── Input (raw TOML) ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BppConfigInput {
    pub version: u32,
    pub stream: StreamConfigInput,
    pub sender: SenderConfigInput,
    pub receiver: ReceiverConfigInput,
    pub trimmer: TrimmerConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamConfigInput {
    pub layers: Option<usize>,
    pub temporal_levels: Option<u8>,
    pub intra_period: Option<u32>,
    pub max_packet_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SenderConfigInput {
    pub strategy: Option<SizeStrategy>,
    pub command: Option<Command>,
    pub condition: Option<Condition>,
    pub threshold: Option<u8>,
    pub relax_step: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiverConfigInput {
    pub reorder_window: Option<usize>,
    pub initial_nal_number: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrimmerConfigInput {
    pub bandwidth_bps: Option<u64>,
    pub policy: Option<TrimPolicyName>,
    pub period: Option<f64>,
    pub extra: Option<f64>,
}

/// `[trimmer] policy`; `period` and `extra` sit beside it in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrimPolicyName {
    #[default]
    Basic,
    NoTrimBeforePeriod,
    Optimistic,
}

// ─── Resolved ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TrimmerConfig {
    /// Target bandwidth in bits per second.
    pub bandwidth_bps: u64,
    pub policy: TrimPolicy,
}

impl Default for TrimmerConfig {
    fn default() -> Self {
        TrimmerConfig {
            bandwidth_bps: 1_048_576,
            policy: TrimPolicy::Basic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BppConfig {
    pub version: u32,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub trimmer: TrimmerConfig,
}

impl Default for BppConfig {
    fn default() -> Self {
        let sender = SenderConfig::default();
        let receiver = ReceiverConfig {
            layers: sender.chunker.layers,
            temporal: sender.chunker.temporal,
            ..Default::default()
        };
        BppConfig {
            version: CONFIG_VERSION,
            sender,
            receiver,
            trimmer: TrimmerConfig::default(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl TrimmerConfigInput {
    fn resolve(self) -> Result<TrimmerConfig, ConfigError> {
        let period = self.period.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&period) {
            return Err(invalid("trimmer.period", "must be within 0.0..=1.0"));
        }
        let extra = self.extra.unwrap_or(0.0);
        if !(extra >= 0.0 && extra.is_finite()) {
            return Err(invalid("trimmer.extra", "must be a non-negative number"));
        }

        let policy = match self.policy.unwrap_or_default() {
            TrimPolicyName::Basic => TrimPolicy::Basic,
            TrimPolicyName::NoTrimBeforePeriod => TrimPolicy::NoTrimBeforePeriod { period },
            TrimPolicyName::Optimistic => TrimPolicy::Optimistic { period, extra },
        };

        Ok(TrimmerConfig {
            bandwidth_bps: self
                .bandwidth_bps
                .unwrap_or(TrimmerConfig::default().bandwidth_bps),
            policy,
        })
    }
}

impl BppConfigInput {
    pub fn resolve(self) -> Result<BppConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = BppConfig::default();

        // [stream]
        let layers = self.stream.layers.unwrap_or(defaults.sender.chunker.layers);
        if !(1..=MAX_LAYERS).contains(&layers) {
            return Err(invalid("stream.layers", format!("must be within 1..={MAX_LAYERS}")));
        }
        let temporal_levels = self
            .stream
            .temporal_levels
            .unwrap_or(defaults.sender.chunker.temporal.temporal_levels());
        if !(1..=5).contains(&temporal_levels) {
            return Err(invalid("stream.temporal_levels", "must be within 1..=5"));
        }
        let intra_period = self
            .stream
            .intra_period
            .unwrap_or(defaults.sender.chunker.temporal.intra_period());
        if intra_period == 0 {
            return Err(invalid("stream.intra_period", "must be at least 1"));
        }
        let max_packet_size = self
            .stream
            .max_packet_size
            .unwrap_or(defaults.sender.chunker.max_packet_size);
        let min_packet = packet_overhead(layers) + MIN_FRAGMENT_SIZE as usize * layers;
        if max_packet_size < min_packet || max_packet_size > u16::MAX as usize {
            return Err(invalid(
                "stream.max_packet_size",
                format!("must be within {min_packet}..={} for {layers} layers", u16::MAX),
            ));
        }
        let temporal = TemporalLayerModel::new(temporal_levels, intra_period);

        // [sender]
        let command = self.sender.command.unwrap_or(defaults.sender.command);
        let condition = self.sender.condition.unwrap_or(defaults.sender.condition);
        let threshold = self.sender.threshold.unwrap_or(defaults.sender.threshold);
        if threshold > MAX_SIGNIFICANCE {
            return Err(invalid("sender.threshold", format!("must be at most {MAX_SIGNIFICANCE}")));
        }
        let function = match self.sender.relax_step {
            Some(step) if step > 0 => BppFunction::RelaxThreshold(step),
            _ => BppFunction::None,
        };

        let sender = SenderConfig {
            chunker: ChunkerConfig {
                layers,
                max_packet_size,
                strategy: self.sender.strategy.unwrap_or_default(),
                temporal,
            },
            command,
            condition,
            threshold,
            function,
        };

        // [receiver]
        let receiver = ReceiverConfig {
            layers,
            temporal,
            reorder_window: self
                .receiver
                .reorder_window
                .unwrap_or(defaults.receiver.reorder_window),
            initial_nal_number: self.receiver.initial_nal_number,
        };

        Ok(BppConfig {
            version,
            sender,
            receiver,
            trimmer: self.trimmer.resolve()?,
        })
    }
}

impl BppConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(BppConfig::default());
        }
        let parsed: BppConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}
