//! Capital allocation across a layer's enabled strategies.

use crate::config::AllocationConfig;
use crate::error::{EngineError, EngineResult};
use crate::layer::{AllocationPolicy, Layer, LayerMember, PerformanceSnapshot};
use crate::utils::decimal::{floor_units, safe_div};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Allocation computed for a single strategy.
///
/// Ephemeral: recomputed on every call, never persisted by the engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAllocation {
    pub strategy_id: String,
    /// Allocated capital in dollars.
    pub dollars: Decimal,
    /// Fraction of total capital, in 0..1. Fractions sum to 1.
    pub fraction: Decimal,
    /// Names the policy and the key parameter that produced this share.
    pub rationale: String,
}

/// Computes per-strategy capital allocation for a layer.
///
/// Stateless and pure: same layer, capital, and performance inputs always
/// produce the same result.
pub struct CapitalAllocator {
    config: AllocationConfig,
}

impl CapitalAllocator {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    /// Compute the allocation for `layer` under its configured policy.
    ///
    /// Only enabled members participate, and each enabled member's weight
    /// must lie in 0..1. An empty enabled set yields an
    /// empty result - "no allocation", not an error. Missing performance
    /// data for one strategy degrades that strategy to a documented
    /// low-confidence default instead of blocking the whole layer.
    pub fn allocate(
        &self,
        layer: &Layer,
        total_capital: Decimal,
        performance: &HashMap<String, PerformanceSnapshot>,
    ) -> EngineResult<Vec<StrategyAllocation>> {
        if total_capital <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "total_capital must be positive, got {total_capital}"
            )));
        }

        let active: Vec<&LayerMember> = layer.enabled_members().collect();
        if active.is_empty() {
            debug!(layer_id = %layer.id, "No enabled members, empty allocation");
            return Ok(Vec::new());
        }

        for member in &active {
            if member.weight < Decimal::ZERO || member.weight > Decimal::ONE {
                return Err(EngineError::InvalidInput(format!(
                    "member {} weight {} is outside 0..1",
                    member.strategy_id, member.weight
                )));
            }
        }

        let fractions = match layer.allocation_policy {
            AllocationPolicy::Equal => self.equal_fractions(&active),
            AllocationPolicy::Weighted => self.weighted_fractions(&active),
            AllocationPolicy::Dynamic => self.dynamic_fractions(&active, performance),
            AllocationPolicy::Kelly => self.kelly_fractions(&active, performance),
        };

        debug_assert!(
            (fractions.iter().map(|(_, f, _)| *f).sum::<Decimal>() - Decimal::ONE).abs()
                < Decimal::new(1, 9),
            "normalized fractions must sum to 1"
        );

        let allocations = fractions
            .into_iter()
            .map(|(strategy_id, fraction, rationale)| StrategyAllocation {
                dollars: total_capital * fraction,
                strategy_id,
                fraction,
                rationale,
            })
            .collect();

        Ok(allocations)
    }

    /// Whole-unit position size for an allocation at a given price.
    ///
    /// Always rounds down; the remainder stays in cash.
    pub fn position_size(&self, allocated: Decimal, price: Decimal) -> u64 {
        floor_units(allocated, price)
    }

    fn equal_fractions(&self, active: &[&LayerMember]) -> Vec<(String, Decimal, String)> {
        let count = Decimal::from(active.len());
        let fraction = Decimal::ONE / count;
        active
            .iter()
            .map(|m| {
                (
                    m.strategy_id.clone(),
                    fraction,
                    format!("equal split across {} active strategies", active.len()),
                )
            })
            .collect()
    }

    fn weighted_fractions(&self, active: &[&LayerMember]) -> Vec<(String, Decimal, String)> {
        let weight_sum: Decimal = active.iter().map(|m| m.weight).sum();
        if weight_sum == Decimal::ZERO {
            // All-zero weights carry no preference; fall back to equal split
            // instead of dividing by zero.
            debug!("All member weights are zero, falling back to equal split");
            return self.equal_fractions(active);
        }

        active
            .iter()
            .map(|m| {
                let fraction = m.weight / weight_sum;
                (
                    m.strategy_id.clone(),
                    fraction,
                    format!("weighted: static weight {} of {}", m.weight, weight_sum),
                )
            })
            .collect()
    }

    fn dynamic_fractions(
        &self,
        active: &[&LayerMember],
        performance: &HashMap<String, PerformanceSnapshot>,
    ) -> Vec<(String, Decimal, String)> {
        let floor = self.config.dynamic_score_floor;

        let scored: Vec<(String, Decimal, String)> = active
            .iter()
            .map(|m| match performance.get(&m.strategy_id) {
                Some(perf) => {
                    let raw = perf.sharpe * (Decimal::ONE + perf.period_return);
                    let score = raw.max(floor);
                    let rationale = format!(
                        "dynamic: score {score} (sharpe {}, period return {})",
                        perf.sharpe, perf.period_return
                    );
                    (m.strategy_id.clone(), score, rationale)
                }
                None => (
                    m.strategy_id.clone(),
                    floor,
                    format!("dynamic: no performance data, floor score {floor}"),
                ),
            })
            .collect();

        // The floor keeps every score positive, so the sum cannot be zero.
        let score_sum: Decimal = scored.iter().map(|(_, s, _)| *s).sum();
        scored
            .into_iter()
            .map(|(id, score, rationale)| (id, score / score_sum, rationale))
            .collect()
    }

    fn kelly_fractions(
        &self,
        active: &[&LayerMember],
        performance: &HashMap<String, PerformanceSnapshot>,
    ) -> Vec<(String, Decimal, String)> {
        let clamped: Vec<(String, Decimal, String)> = active
            .iter()
            .map(|m| {
                let (fraction, rationale) = match performance.get(&m.strategy_id) {
                    Some(perf) if perf.avg_loss > Decimal::ZERO => {
                        let b = perf.avg_win / perf.avg_loss;
                        let p = perf.win_rate;
                        let q = Decimal::ONE - p;
                        let raw = safe_div(b * p - q, b);
                        let scaled = raw * self.config.kelly_multiplier;
                        let fraction = scaled
                            .max(self.config.kelly_min_fraction)
                            .min(self.config.kelly_max_fraction);
                        (
                            fraction,
                            format!(
                                "kelly: half-Kelly {scaled} from p={p}, b={b}, clamped to {fraction}"
                            ),
                        )
                    }
                    _ => (
                        self.config.kelly_default_fraction,
                        format!(
                            "kelly: missing or zero-loss data, default fraction {}",
                            self.config.kelly_default_fraction
                        ),
                    ),
                };
                (m.strategy_id.clone(), fraction, rationale)
            })
            .collect();

        // Clamped fractions rarely sum to 1; normalize so the whole pool
        // is deployed.
        let fraction_sum: Decimal = clamped.iter().map(|(_, f, _)| *f).sum();
        clamped
            .into_iter()
            .map(|(id, fraction, rationale)| (id, fraction / fraction_sum, rationale))
            .collect()
    }
}
