//! # Chunk-Size Strategies
//!
//! How a packet's payload budget is split between quality layers. Every
//! strategy returns one allocation per layer with `sum <= budget`, and never
//! allocates to a layer with no remaining demand.

use serde::{Deserialize, Serialize};

/// Smallest fragment worth opening a content for.
pub const MIN_FRAGMENT_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeStrategy {
    /// Equal share per layer, remainder to the last layer.
    #[default]
    EvenSplit,
    /// Equal share, with bytes small layers don't need handed to large ones.
    DynamicSplit,
    /// Whole budget to the lowest layer that still has data.
    InOrder,
    /// Lowest layer first, then whole subsequent layers while they fit.
    InOrderPacked,
}

impl SizeStrategy {
    pub fn calculate(&self, budget: u32, demand: &[u32]) -> Vec<u32> {
        match self {
            SizeStrategy::EvenSplit => even_split(budget, demand),
            SizeStrategy::DynamicSplit => dynamic_split(budget, demand),
            SizeStrategy::InOrder => in_order(budget, demand),
            SizeStrategy::InOrderPacked => in_order_packed(budget, demand),
        }
    }
}

impl std::fmt::Display for SizeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SizeStrategy::EvenSplit => "even-split",
            SizeStrategy::DynamicSplit => "dynamic-split",
            SizeStrategy::InOrder => "in-order",
            SizeStrategy::InOrderPacked => "in-order-packed",
        };
        f.write_str(name)
    }
}

fn even_split(budget: u32, demand: &[u32]) -> Vec<u32> {
    let n = demand.len() as u32;
    if n == 0 {
        return Vec::new();
    }
    let share = budget / n;
    let mut out: Vec<u32> = demand
        .iter()
        .map(|&d| if d > 0 { share } else { 0 })
        .collect();
    let last = out.len() - 1;
    if demand[last] > 0 {
        out[last] += budget - share * n;
    }
    out
}

fn dynamic_split(budget: u32, demand: &[u32]) -> Vec<u32> {
    let active = demand.iter().filter(|&&d| d > 0).count() as u32;
    if active == 0 {
        return vec![0; demand.len()];
    }
    let share = budget / active;

    let mut out = vec![0; demand.len()];
    let mut capped = Vec::new();
    for (i, &d) in demand.iter().enumerate() {
        if d == 0 {
            continue;
        }
        if d < share {
            out[i] = d + 1;
        } else {
            out[i] = share;
            capped.push(i);
        }
    }

    if !capped.is_empty() {
        let used: u32 = out.iter().sum();
        let extra = (budget - used) / capped.len() as u32;
        for i in capped {
            out[i] += extra;
        }
    }
    out
}

fn in_order(budget: u32, demand: &[u32]) -> Vec<u32> {
    let mut out = vec![0; demand.len()];
    if budget < MIN_FRAGMENT_SIZE {
        return out;
    }
    if let Some(first) = demand.iter().position(|&d| d > 0) {
        out[first] = budget;
    }
    out
}

fn in_order_packed(budget: u32, demand: &[u32]) -> Vec<u32> {
    let mut out = vec![0; demand.len()];
    if budget < MIN_FRAGMENT_SIZE {
        return out;
    }
    let Some(first) = demand.iter().position(|&d| d > 0) else {
        return out;
    };

    out[first] = demand[first].min(budget);
    let mut left = budget - out[first];
    for (i, &d) in demand.iter().enumerate().skip(first + 1) {
        if d == 0 {
            continue;
        }
        if left < MIN_FRAGMENT_SIZE || d > left {
            break;
        }
        out[i] = d;
        left -= d;
    }
    out
}
