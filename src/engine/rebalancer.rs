//! Two-phase rebalancing: plan against safety bounds, commit explicitly.

use crate::config::RebalanceConfig;
use crate::engine::allocator::{CapitalAllocator, StrategyAllocation};
use crate::error::EngineResult;
use crate::layer::{Layer, PerformanceSnapshot};
use crate::utils::decimal::{percent_change, safe_div};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// One strategy's proposed allocation move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationChange {
    pub strategy_id: String,
    pub current: Decimal,
    pub proposed: Decimal,
    /// Signed percent change from current to proposed.
    pub change_pct: Decimal,
    pub reason: String,
    /// True when the move was clipped to the per-change risk cap.
    pub capped: bool,
}

/// An immutable rebalance proposal.
///
/// Planning never writes; applying a plan is a separate, explicit commit
/// guarded by the version token captured here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub layer_id: String,
    pub changes: Vec<AllocationChange>,
    /// Full post-rebalance allocation across every strategy the plan keeps
    /// funded, including strategies the plan does not move. Committing
    /// writes exactly this set, so strategies already at target keep their
    /// rows.
    pub targets: Vec<StrategyAllocation>,
    /// True iff the largest absolute per-strategy change exceeds the
    /// configured threshold.
    pub should_rebalance: bool,
    /// Headline metric: largest absolute per-strategy percent change.
    pub max_change_pct: Decimal,
    /// Layer config version at planning time; commits are rejected if the
    /// stored version has moved on.
    pub base_version: u64,
}

/// Decides if and how to move from current to target allocation.
pub struct RebalancingPlanner {
    config: RebalanceConfig,
}

impl RebalancingPlanner {
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    /// Build a rebalance plan for `layer`.
    ///
    /// Recomputes the target allocation via the allocator and diffs it
    /// against the current per-strategy dollars. Strategies whose current
    /// and target already match produce no change entry; a layer fully at
    /// target yields an empty change list and `should_rebalance = false`.
    pub fn plan(
        &self,
        layer: &Layer,
        allocator: &CapitalAllocator,
        total_capital: Decimal,
        performance: &HashMap<String, PerformanceSnapshot>,
        current: &HashMap<String, Decimal>,
    ) -> EngineResult<RebalancePlan> {
        let allocator_targets = allocator.allocate(layer, total_capital, performance)?;

        let cap = self.config.max_allocation_change_pct;
        let mut changes = Vec::new();
        let mut targets = Vec::with_capacity(allocator_targets.len());
        let mut max_change_pct = Decimal::ZERO;

        for target in &allocator_targets {
            let current_dollars = current
                .get(&target.strategy_id)
                .copied()
                .unwrap_or(Decimal::ZERO);

            if current_dollars == target.dollars {
                // Already at target: no change entry, but the strategy
                // still belongs to the committed allocation.
                targets.push(target.clone());
                continue;
            }

            let change = if current_dollars == Decimal::ZERO {
                // New allocation: a percent of zero is meaningless, so the
                // move is recorded as a 100% change and exempt from the cap.
                AllocationChange {
                    strategy_id: target.strategy_id.clone(),
                    current: Decimal::ZERO,
                    proposed: target.dollars,
                    change_pct: dec!(100),
                    reason: format!("new allocation: {}", target.rationale),
                    capped: false,
                }
            } else {
                let raw_pct = percent_change(current_dollars, target.dollars);
                if raw_pct.abs() > cap {
                    let clipped_pct = if raw_pct > Decimal::ZERO { cap } else { -cap };
                    let proposed =
                        current_dollars * (Decimal::ONE + clipped_pct / dec!(100));
                    AllocationChange {
                        strategy_id: target.strategy_id.clone(),
                        current: current_dollars,
                        proposed,
                        change_pct: clipped_pct,
                        reason: format!(
                            "{} (move of {raw_pct:.2}% capped at {cap}% for risk)",
                            target.rationale
                        ),
                        capped: true,
                    }
                } else {
                    AllocationChange {
                        strategy_id: target.strategy_id.clone(),
                        current: current_dollars,
                        proposed: target.dollars,
                        change_pct: raw_pct,
                        reason: target.rationale.clone(),
                        capped: false,
                    }
                }
            };

            targets.push(StrategyAllocation {
                strategy_id: change.strategy_id.clone(),
                dollars: change.proposed,
                fraction: safe_div(change.proposed, total_capital),
                rationale: change.reason.clone(),
            });
            max_change_pct = max_change_pct.max(change.change_pct.abs());
            changes.push(change);
        }

        // Strategies still holding capital but absent from the target set
        // (disabled or removed members) are wound down explicitly, so the
        // plan always shows the capital leaving before a commit drops it.
        let mut stale: Vec<(&String, &Decimal)> = current
            .iter()
            .filter(|(id, dollars)| {
                **dollars != Decimal::ZERO
                    && !allocator_targets.iter().any(|t| &t.strategy_id == *id)
            })
            .collect();
        stale.sort_by(|a, b| a.0.cmp(b.0));
        for (strategy_id, dollars) in stale {
            changes.push(AllocationChange {
                strategy_id: strategy_id.clone(),
                current: *dollars,
                proposed: Decimal::ZERO,
                change_pct: dec!(-100),
                reason: "wind down: strategy no longer receives an allocation".to_string(),
                capped: false,
            });
            max_change_pct = max_change_pct.max(dec!(100));
        }

        let should_rebalance = max_change_pct > self.config.min_rebalance_threshold_pct;

        debug!(
            layer_id = %layer.id,
            changes = changes.len(),
            %max_change_pct,
            should_rebalance,
            "Rebalance plan built"
        );

        Ok(RebalancePlan {
            layer_id: layer.id.clone(),
            changes,
            targets,
            should_rebalance,
            max_change_pct,
            base_version: layer.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocationConfig;
    use crate::layer::{AllocationPolicy, ConflictPolicy, LayerMember};
    use rust_decimal_macros::dec;

    fn planner() -> RebalancingPlanner {
        RebalancingPlanner::new(RebalanceConfig::default())
    }

    fn allocator() -> CapitalAllocator {
        CapitalAllocator::new(AllocationConfig::default())
    }

    fn weighted_layer(weights: &[(&str, Decimal)]) -> Layer {
        Layer {
            id: "layer-1".to_string(),
            owner: "owner-1".to_string(),
            name: "Test Layer".to_string(),
            active: true,
            allocation_policy: AllocationPolicy::Weighted,
            conflict_policy: ConflictPolicy::Priority,
            members: weights
                .iter()
                .map(|(id, w)| LayerMember::new(*id, 50, *w))
                .collect(),
            version: 7,
        }
    }

    #[test]
    fn test_already_at_target_means_no_rebalance() {
        let layer = weighted_layer(&[("alpha", dec!(0.5)), ("beta", dec!(0.5))]);
        let mut current = HashMap::new();
        current.insert("alpha".to_string(), dec!(5000));
        current.insert("beta".to_string(), dec!(5000));

        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_000), &HashMap::new(), &current)
            .unwrap();

        assert!(plan.changes.is_empty());
        assert!(!plan.should_rebalance);
        assert_eq!(plan.max_change_pct, Decimal::ZERO);
        // The full allocation is still carried for commit.
        assert_eq!(plan.targets.len(), 2);
        assert!(plan.targets.iter().all(|t| t.dollars == dec!(5000)));
    }

    #[test]
    fn test_targets_cover_unchanged_strategies() {
        // beta sits at target; the plan moves only alpha but the target
        // set keeps beta so a commit cannot drop its row.
        let layer = weighted_layer(&[("alpha", dec!(0.5)), ("beta", dec!(0.5))]);
        let mut current = HashMap::new();
        current.insert("alpha".to_string(), dec!(3000));
        current.insert("beta".to_string(), dec!(5000));

        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_000), &HashMap::new(), &current)
            .unwrap();

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].strategy_id, "alpha");

        assert_eq!(plan.targets.len(), 2);
        let alpha = plan
            .targets
            .iter()
            .find(|t| t.strategy_id == "alpha")
            .unwrap();
        let beta = plan
            .targets
            .iter()
            .find(|t| t.strategy_id == "beta")
            .unwrap();
        assert_eq!(alpha.dollars, dec!(3900)); // capped move, not raw target
        assert_eq!(beta.dollars, dec!(5000));
    }

    #[test]
    fn test_stale_holding_gets_explicit_wind_down() {
        // gamma still holds capital but is no longer in the target set
        // (disabled member): the plan must show that capital leaving.
        let mut layer = weighted_layer(&[
            ("alpha", dec!(0.5)),
            ("beta", dec!(0.5)),
            ("gamma", Decimal::ZERO),
        ]);
        layer.members[2].enabled = false;

        let mut current = HashMap::new();
        current.insert("alpha".to_string(), dec!(5000));
        current.insert("beta".to_string(), dec!(5000));
        current.insert("gamma".to_string(), dec!(2000));

        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_000), &HashMap::new(), &current)
            .unwrap();

        let gamma = plan
            .changes
            .iter()
            .find(|c| c.strategy_id == "gamma")
            .unwrap();
        assert_eq!(gamma.proposed, Decimal::ZERO);
        assert_eq!(gamma.change_pct, dec!(-100));
        assert!(gamma.reason.contains("wind down"));
        assert!(!gamma.capped);

        // The wind-down drives the headline metric and the recommendation.
        assert_eq!(plan.max_change_pct, dec!(100));
        assert!(plan.should_rebalance);

        // Committed targets exclude the wound-down strategy entirely.
        assert!(plan.targets.iter().all(|t| t.strategy_id != "gamma"));
        assert_eq!(plan.targets.len(), 2);
    }

    #[test]
    fn test_small_drift_below_threshold() {
        // 4% drift on alpha: below the 5% default threshold.
        let layer = weighted_layer(&[("alpha", dec!(0.5)), ("beta", dec!(0.5))]);
        let mut current = HashMap::new();
        current.insert("alpha".to_string(), dec!(4807.69));
        current.insert("beta".to_string(), dec!(5192.31));

        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_000), &HashMap::new(), &current)
            .unwrap();

        assert!(!plan.should_rebalance);
        assert_eq!(plan.changes.len(), 2);
        assert!(plan.max_change_pct < dec!(5));
    }

    #[test]
    fn test_oversized_change_clipped_to_cap() {
        // alpha target 5000 from current 3000: raw +66.7%, capped at +30%.
        let layer = weighted_layer(&[("alpha", dec!(0.5)), ("beta", dec!(0.5))]);
        let mut current = HashMap::new();
        current.insert("alpha".to_string(), dec!(3000));
        current.insert("beta".to_string(), dec!(7000));

        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_000), &HashMap::new(), &current)
            .unwrap();

        let alpha = plan
            .changes
            .iter()
            .find(|c| c.strategy_id == "alpha")
            .unwrap();
        assert!(alpha.capped);
        assert_eq!(alpha.change_pct, dec!(30));
        assert_eq!(alpha.proposed, dec!(3900)); // 3000 * 1.30
        assert!(alpha.reason.contains("capped"));
        assert!(plan.should_rebalance);
    }

    #[test]
    fn test_fifty_percent_move_clipped_to_thirty() {
        let layer = weighted_layer(&[("alpha", dec!(0.6)), ("beta", dec!(0.4))]);
        let mut current = HashMap::new();
        current.insert("alpha".to_string(), dec!(4000)); // target 6000: +50%
        current.insert("beta".to_string(), dec!(6000)); // target 4000: -33.3%

        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_000), &HashMap::new(), &current)
            .unwrap();

        let alpha = plan
            .changes
            .iter()
            .find(|c| c.strategy_id == "alpha")
            .unwrap();
        let beta = plan
            .changes
            .iter()
            .find(|c| c.strategy_id == "beta")
            .unwrap();

        assert_eq!(alpha.change_pct, dec!(30));
        assert!(alpha.capped);
        assert_eq!(beta.change_pct, dec!(-30));
        assert!(beta.capped);
        assert_eq!(plan.max_change_pct, dec!(30));
    }

    #[test]
    fn test_zero_current_is_new_allocation_not_division() {
        let layer = weighted_layer(&[("alpha", dec!(0.5)), ("beta", dec!(0.5))]);
        let mut current = HashMap::new();
        current.insert("beta".to_string(), dec!(10_000));
        // alpha has no current allocation at all

        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_000), &HashMap::new(), &current)
            .unwrap();

        let alpha = plan
            .changes
            .iter()
            .find(|c| c.strategy_id == "alpha")
            .unwrap();
        assert_eq!(alpha.current, Decimal::ZERO);
        assert_eq!(alpha.proposed, dec!(5000));
        assert_eq!(alpha.change_pct, dec!(100));
        assert!(!alpha.capped);
        assert!(alpha.reason.starts_with("new allocation"));
    }

    #[test]
    fn test_plan_captures_layer_version() {
        let layer = weighted_layer(&[("alpha", dec!(1))]);
        let plan = planner()
            .plan(
                &layer,
                &allocator(),
                dec!(10_000),
                &HashMap::new(),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(plan.base_version, 7);
    }

    #[test]
    fn test_threshold_is_strict_inequality() {
        let layer = weighted_layer(&[("alpha", dec!(1))]);

        // Exactly 5%: (10500 - 10000) / 10000 = 5%, not > 5%.
        let mut current = HashMap::new();
        current.insert("alpha".to_string(), dec!(10_000));
        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_500), &HashMap::new(), &current)
            .unwrap();
        assert_eq!(plan.max_change_pct, dec!(5));
        assert!(!plan.should_rebalance);

        // Just over: 5.5% triggers.
        let plan = planner()
            .plan(&layer, &allocator(), dec!(10_550), &HashMap::new(), &current)
            .unwrap();
        assert!(plan.should_rebalance);
    }
}
