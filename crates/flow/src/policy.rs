use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Error rate above which items are dropped.
pub const DEFAULT_DROP_THRESHOLD: f64 = 0.4;

/// One step of the delay ladder: identities whose rate is at least `rate`
/// wait `delay_ms` before forwarding (unless an earlier tier matched).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayTier {
    pub rate: f64,
    pub delay_ms: u64,
}

impl DelayTier {
    pub const fn new(rate: f64, delay_ms: u64) -> Self {
        Self { rate, delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Default ladder: 3s at ≥20% errors, 1s at ≥10%, 200ms otherwise.
pub fn default_tiers() -> Vec<DelayTier> {
    vec![
        DelayTier::new(0.2, 3_000),
        DelayTier::new(0.1, 1_000),
        DelayTier::new(0.0, 200),
    ]
}

/// What to do with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Drop,
    Delay(Duration),
}

/// Drop threshold plus a descending delay ladder ending in a catch-all.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPolicy {
    drop_threshold: f64,
    tiers: Vec<DelayTier>,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            drop_threshold: DEFAULT_DROP_THRESHOLD,
            tiers: default_tiers(),
        }
    }
}

impl FlowPolicy {
    /// Build a policy. Tier rates must be strictly descending and the last
    /// tier must have rate `0` so every rate maps to a delay.
    pub fn new(drop_threshold: f64, tiers: Vec<DelayTier>) -> Result<Self> {
        if !(0.0..=1.0).contains(&drop_threshold) {
            return Err(Error::invalid_policy(format!(
                "drop threshold {drop_threshold} is outside [0, 1]"
            )));
        }
        let Some(last) = tiers.last() else {
            return Err(Error::invalid_policy("at least one delay tier is required"));
        };
        if last.rate != 0.0 {
            return Err(Error::invalid_policy(format!(
                "last tier must be the rate 0 catch-all, found rate {}",
                last.rate
            )));
        }
        if let Some(tier) = tiers.iter().find(|t| !(0.0..=1.0).contains(&t.rate)) {
            return Err(Error::invalid_policy(format!(
                "tier rate {} is outside [0, 1]",
                tier.rate
            )));
        }
        if let Some(pair) = tiers.windows(2).find(|w| w[0].rate <= w[1].rate) {
            return Err(Error::invalid_policy(format!(
                "tier rates must be strictly descending, found {} before {}",
                pair[0].rate, pair[1].rate
            )));
        }
        Ok(Self {
            drop_threshold,
            tiers,
        })
    }

    pub fn drop_threshold(&self) -> f64 {
        self.drop_threshold
    }

    pub fn tiers(&self) -> &[DelayTier] {
        &self.tiers
    }

    pub fn decide(&self, rate: f64) -> Decision {
        if rate > self.drop_threshold {
            return Decision::Drop;
        }
        let delay = self
            .tiers
            .iter()
            .find(|tier| tier.rate <= rate)
            .or(self.tiers.last())
            .map_or(Duration::ZERO, DelayTier::delay);
        Decision::Delay(delay)
    }
}
