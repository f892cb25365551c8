//! Configuration for the layer engine.
//!
//! The numeric constants here encode risk-tuning policy rather than
//! mathematical law (score floors, Kelly clamps, rebalance bounds,
//! correlation buckets), so all of them load from config files and
//! environment variables instead of living as literals in the math.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Allocation policy tuning
    #[serde(default)]
    pub allocation: AllocationConfig,
    /// Rebalancing safety bounds
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    /// Correlation classification thresholds
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Floor for the dynamic policy's score; keeps every enabled strategy
    /// at a nonzero share even after losses or missing data.
    #[serde(default = "default_dynamic_score_floor")]
    pub dynamic_score_floor: Decimal,
    /// Multiplier applied to the raw Kelly fraction (0.5 = half-Kelly).
    #[serde(default = "default_kelly_multiplier")]
    pub kelly_multiplier: Decimal,
    /// Lower clamp for a single strategy's Kelly fraction, pre-normalization.
    #[serde(default = "default_kelly_min_fraction")]
    pub kelly_min_fraction: Decimal,
    /// Upper clamp for a single strategy's Kelly fraction, pre-normalization.
    #[serde(default = "default_kelly_max_fraction")]
    pub kelly_max_fraction: Decimal,
    /// Fraction assigned when a strategy has no usable win/loss data.
    #[serde(default = "default_kelly_default_fraction")]
    pub kelly_default_fraction: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Minimum largest per-strategy change (in percent) before a plan
    /// recommends rebalancing. Default 5 = 5%.
    #[serde(default = "default_min_rebalance_threshold_pct")]
    pub min_rebalance_threshold_pct: Decimal,
    /// Cap on any single strategy's allocation change (in percent).
    /// Larger proposed moves are clipped to this. Default 30 = 30%.
    #[serde(default = "default_max_allocation_change_pct")]
    pub max_allocation_change_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// |r| at or above this classifies as high correlation.
    #[serde(default = "default_high_correlation")]
    pub high_threshold: f64,
    /// |r| at or above this (but below high) classifies as medium.
    #[serde(default = "default_medium_correlation")]
    pub medium_threshold: f64,
}

// Default value functions

fn default_dynamic_score_floor() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_kelly_multiplier() -> Decimal {
    Decimal::new(5, 1) // 0.5 = half-Kelly
}

fn default_kelly_min_fraction() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_kelly_max_fraction() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_kelly_default_fraction() -> Decimal {
    Decimal::new(5, 2) // 0.05 for missing/zero-loss data
}

fn default_min_rebalance_threshold_pct() -> Decimal {
    Decimal::new(5, 0) // 5%
}

fn default_max_allocation_change_pct() -> Decimal {
    Decimal::new(30, 0) // 30%
}

fn default_high_correlation() -> f64 {
    0.7
}

fn default_medium_correlation() -> f64 {
    0.4
}

impl EngineConfig {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("AMP"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.allocation.dynamic_score_floor > Decimal::ZERO,
            "dynamic_score_floor must be positive"
        );

        anyhow::ensure!(
            self.allocation.kelly_multiplier > Decimal::ZERO
                && self.allocation.kelly_multiplier <= Decimal::ONE,
            "kelly_multiplier must be in (0, 1]"
        );

        anyhow::ensure!(
            self.allocation.kelly_min_fraction > Decimal::ZERO
                && self.allocation.kelly_min_fraction < self.allocation.kelly_max_fraction,
            "kelly_min_fraction must be positive and below kelly_max_fraction"
        );

        anyhow::ensure!(
            self.allocation.kelly_default_fraction >= self.allocation.kelly_min_fraction
                && self.allocation.kelly_default_fraction <= self.allocation.kelly_max_fraction,
            "kelly_default_fraction must lie within the Kelly clamp"
        );

        anyhow::ensure!(
            self.rebalance.min_rebalance_threshold_pct >= Decimal::ZERO,
            "min_rebalance_threshold_pct must be non-negative"
        );

        anyhow::ensure!(
            self.rebalance.max_allocation_change_pct > Decimal::ZERO,
            "max_allocation_change_pct must be positive"
        );

        anyhow::ensure!(
            self.correlation.medium_threshold > 0.0
                && self.correlation.medium_threshold < self.correlation.high_threshold
                && self.correlation.high_threshold <= 1.0,
            "correlation thresholds must satisfy 0 < medium < high <= 1"
        );

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allocation: AllocationConfig::default(),
            rebalance: RebalanceConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            dynamic_score_floor: default_dynamic_score_floor(),
            kelly_multiplier: default_kelly_multiplier(),
            kelly_min_fraction: default_kelly_min_fraction(),
            kelly_max_fraction: default_kelly_max_fraction(),
            kelly_default_fraction: default_kelly_default_fraction(),
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            min_rebalance_threshold_pct: default_min_rebalance_threshold_pct(),
            max_allocation_change_pct: default_max_allocation_change_pct(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_correlation(),
            medium_threshold: default_medium_correlation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_kelly_clamp_rejected() {
        let mut config = EngineConfig::default();
        config.allocation.kelly_min_fraction = dec!(0.30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_correlation_thresholds_rejected() {
        let mut config = EngineConfig::default();
        config.correlation.medium_threshold = 0.8;
        assert!(config.validate().is_err());
    }
}
