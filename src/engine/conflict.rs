//! Conflict resolution for simultaneous signals on one instrument.
//!
//! Simultaneity is bucketed by UTC calendar day, the same rule the
//! correlation analyzer uses for its daily series.

use crate::error::{EngineError, EngineResult};
use crate::layer::{ConflictPolicy, Layer, SignalAction, SignalEvent};
use crate::utils::decimal::to_f64;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Picks one action when multiple enabled strategies signal on the same
/// instrument at once.
///
/// Total and deterministic: every valid batch maps to exactly one action,
/// and the same batch always maps to the same action.
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a batch of simultaneous signals to one action.
    ///
    /// All events must share one symbol and one UTC-day bucket; mixed
    /// batches are rejected before any policy runs. Signals from disabled
    /// or unknown strategies are ignored; if nothing is left the safe
    /// answer is Hold. `current_allocation` is optional capital weighting
    /// for the net-signal policy.
    pub fn resolve(
        &self,
        layer: &Layer,
        signals: &[SignalEvent],
        current_allocation: Option<&HashMap<String, Decimal>>,
    ) -> EngineResult<SignalAction> {
        if signals.is_empty() {
            return Ok(SignalAction::Hold);
        }

        let symbol = &signals[0].symbol;
        let bucket = signals[0].day_bucket();
        for event in &signals[1..] {
            if event.symbol != *symbol {
                return Err(EngineError::InvalidInput(format!(
                    "conflict batch mixes symbols {symbol} and {}",
                    event.symbol
                )));
            }
            if event.day_bucket() != bucket {
                return Err(EngineError::InvalidInput(format!(
                    "conflict batch mixes day buckets {bucket} and {}",
                    event.day_bucket()
                )));
            }
        }

        let participating: Vec<&SignalEvent> = signals
            .iter()
            .filter(|s| {
                layer
                    .member(&s.strategy_id)
                    .map(|m| m.enabled)
                    .unwrap_or(false)
            })
            .collect();

        if participating.is_empty() {
            debug!(layer_id = %layer.id, %symbol, "No enabled signals in batch, holding");
            return Ok(SignalAction::Hold);
        }

        let action = match layer.conflict_policy {
            ConflictPolicy::Priority => self.by_priority(layer, &participating),
            ConflictPolicy::Voting => self.by_vote(&participating),
            ConflictPolicy::NetSignal => {
                self.by_net_signal(layer, &participating, current_allocation)
            }
        };

        debug!(
            layer_id = %layer.id,
            %symbol,
            policy = %layer.conflict_policy,
            signals = participating.len(),
            resolved = %action,
            "Conflict resolved"
        );

        Ok(action)
    }

    /// Group a raw event stream into valid resolver batches, keyed by
    /// (symbol, UTC day). Batches are ordered for deterministic iteration.
    pub fn group_batches(signals: &[SignalEvent]) -> BTreeMap<(String, NaiveDate), Vec<SignalEvent>> {
        let mut batches: BTreeMap<(String, NaiveDate), Vec<SignalEvent>> = BTreeMap::new();
        for event in signals {
            batches
                .entry((event.symbol.clone(), event.day_bucket()))
                .or_default()
                .push(event.clone());
        }
        batches
    }

    fn by_priority(&self, layer: &Layer, signals: &[&SignalEvent]) -> SignalAction {
        // Highest priority wins; ties break to the lexicographically
        // smallest strategy id so resolution never depends on input order.
        let winner = signals.iter().max_by(|a, b| {
            let pa = layer.member(&a.strategy_id).map(|m| m.priority).unwrap_or(0);
            let pb = layer.member(&b.strategy_id).map(|m| m.priority).unwrap_or(0);
            pa.cmp(&pb)
                .then_with(|| b.strategy_id.cmp(&a.strategy_id))
        });
        winner.map(|s| s.action).unwrap_or(SignalAction::Hold)
    }

    fn by_vote(&self, signals: &[&SignalEvent]) -> SignalAction {
        let mut buys = 0usize;
        let mut sells = 0usize;
        let mut holds = 0usize;
        for s in signals {
            match s.action {
                SignalAction::Buy => buys += 1,
                SignalAction::Sell => sells += 1,
                SignalAction::Hold => holds += 1,
            }
        }

        // Ties never trade: buy/sell deadlock is an undecided market view,
        // and a directional camp merely matching the hold camp is not a
        // mandate either. A strict plurality over both rivals is required.
        if buys > sells && buys > holds {
            SignalAction::Buy
        } else if sells > buys && sells > holds {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        }
    }

    fn by_net_signal(
        &self,
        layer: &Layer,
        signals: &[&SignalEvent],
        current_allocation: Option<&HashMap<String, Decimal>>,
    ) -> SignalAction {
        let total: Decimal = current_allocation
            .map(|alloc| alloc.values().copied().sum())
            .unwrap_or(Decimal::ZERO);

        let net: f64 = signals
            .iter()
            .map(|s| {
                let weight = match current_allocation {
                    Some(alloc) if total > Decimal::ZERO => alloc
                        .get(&s.strategy_id)
                        .map(|d| to_f64(*d / total))
                        .unwrap_or(0.0),
                    _ => 1.0,
                };
                s.action.as_score() * weight
            })
            .sum();

        if net > 0.0 {
            SignalAction::Buy
        } else if net < 0.0 {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{AllocationPolicy, LayerMember};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn layer(policy: ConflictPolicy) -> Layer {
        Layer {
            id: "layer-1".to_string(),
            owner: "owner-1".to_string(),
            name: "Test Layer".to_string(),
            active: true,
            allocation_policy: AllocationPolicy::Equal,
            conflict_policy: policy,
            members: vec![
                LayerMember::new("alpha", 80, dec!(0.5)),
                LayerMember::new("beta", 50, dec!(0.3)),
                LayerMember::new("gamma", 20, dec!(0.2)),
            ],
            version: 1,
        }
    }

    fn signal(strategy: &str, action: SignalAction) -> SignalEvent {
        SignalEvent::new(
            strategy,
            "BTCUSDT",
            action,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_priority_highest_wins() {
        // alpha (priority 80) says BUY, beta (50) says SELL: alpha wins.
        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("beta", SignalAction::Sell),
            signal("alpha", SignalAction::Buy),
        ];

        let action = resolver
            .resolve(&layer(ConflictPolicy::Priority), &signals, None)
            .unwrap();
        assert_eq!(action, SignalAction::Buy);
    }

    #[test]
    fn test_priority_tie_breaks_to_smallest_id() {
        let mut l = layer(ConflictPolicy::Priority);
        l.members[0].priority = 50; // alpha and beta now tied at 50

        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("beta", SignalAction::Sell),
            signal("alpha", SignalAction::Buy),
        ];

        // "alpha" < "beta" lexicographically, so alpha's BUY wins the tie.
        let action = resolver.resolve(&l, &signals, None).unwrap();
        assert_eq!(action, SignalAction::Buy);
    }

    #[test]
    fn test_voting_majority() {
        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("alpha", SignalAction::Buy),
            signal("beta", SignalAction::Buy),
            signal("gamma", SignalAction::Sell),
        ];

        let action = resolver
            .resolve(&layer(ConflictPolicy::Voting), &signals, None)
            .unwrap();
        assert_eq!(action, SignalAction::Buy);
    }

    #[test]
    fn test_voting_buy_sell_tie_holds() {
        let mut l = layer(ConflictPolicy::Voting);
        l.members.push(LayerMember::new("delta", 10, dec!(0.1)));

        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("alpha", SignalAction::Buy),
            signal("beta", SignalAction::Buy),
            signal("gamma", SignalAction::Sell),
            signal("delta", SignalAction::Sell),
        ];

        let action = resolver.resolve(&l, &signals, None).unwrap();
        assert_eq!(action, SignalAction::Hold);
    }

    #[test]
    fn test_voting_buy_hold_tie_holds() {
        // 2 BUY vs 2 HOLD (1 SELL): the buy camp only matches the hold
        // camp, so there is no mandate to trade.
        let mut l = layer(ConflictPolicy::Voting);
        l.members.push(LayerMember::new("delta", 10, dec!(0.1)));
        l.members.push(LayerMember::new("epsilon", 10, dec!(0.1)));

        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("alpha", SignalAction::Buy),
            signal("beta", SignalAction::Buy),
            signal("gamma", SignalAction::Sell),
            signal("delta", SignalAction::Hold),
            signal("epsilon", SignalAction::Hold),
        ];

        let action = resolver.resolve(&l, &signals, None).unwrap();
        assert_eq!(action, SignalAction::Hold);
    }

    #[test]
    fn test_net_signal_unweighted() {
        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("alpha", SignalAction::Sell),
            signal("beta", SignalAction::Sell),
            signal("gamma", SignalAction::Buy),
        ];

        let action = resolver
            .resolve(&layer(ConflictPolicy::NetSignal), &signals, None)
            .unwrap();
        assert_eq!(action, SignalAction::Sell);
    }

    #[test]
    fn test_net_signal_capital_weighted() {
        // gamma's lone BUY outweighs two SELLs when it controls most capital.
        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("alpha", SignalAction::Sell),
            signal("beta", SignalAction::Sell),
            signal("gamma", SignalAction::Buy),
        ];

        let mut allocation = HashMap::new();
        allocation.insert("alpha".to_string(), dec!(1000));
        allocation.insert("beta".to_string(), dec!(1000));
        allocation.insert("gamma".to_string(), dec!(8000));

        let action = resolver
            .resolve(&layer(ConflictPolicy::NetSignal), &signals, Some(&allocation))
            .unwrap();
        assert_eq!(action, SignalAction::Buy);
    }

    #[test]
    fn test_net_signal_zero_sum_holds() {
        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("alpha", SignalAction::Buy),
            signal("beta", SignalAction::Sell),
        ];

        let action = resolver
            .resolve(&layer(ConflictPolicy::NetSignal), &signals, None)
            .unwrap();
        assert_eq!(action, SignalAction::Hold);
    }

    #[test]
    fn test_disabled_member_signals_ignored() {
        let mut l = layer(ConflictPolicy::Priority);
        l.members[0].enabled = false; // alpha disabled

        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("alpha", SignalAction::Buy),
            signal("beta", SignalAction::Sell),
        ];

        let action = resolver.resolve(&l, &signals, None).unwrap();
        assert_eq!(action, SignalAction::Sell);
    }

    #[test]
    fn test_no_participating_signals_holds() {
        let resolver = ConflictResolver::new();
        let signals = vec![signal("unknown-strategy", SignalAction::Buy)];

        let action = resolver
            .resolve(&layer(ConflictPolicy::Priority), &signals, None)
            .unwrap();
        assert_eq!(action, SignalAction::Hold);

        let empty = resolver
            .resolve(&layer(ConflictPolicy::Priority), &[], None)
            .unwrap();
        assert_eq!(empty, SignalAction::Hold);
    }

    #[test]
    fn test_mixed_symbol_batch_rejected() {
        let resolver = ConflictResolver::new();
        let mut other = signal("beta", SignalAction::Sell);
        other.symbol = "ETHUSDT".to_string();
        let signals = vec![signal("alpha", SignalAction::Buy), other];

        assert!(matches!(
            resolver.resolve(&layer(ConflictPolicy::Priority), &signals, None),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_mixed_day_batch_rejected() {
        let resolver = ConflictResolver::new();
        let mut late = signal("beta", SignalAction::Sell);
        late.timestamp = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 1).unwrap();
        let signals = vec![signal("alpha", SignalAction::Buy), late];

        assert!(matches!(
            resolver.resolve(&layer(ConflictPolicy::Priority), &signals, None),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = ConflictResolver::new();
        let signals = vec![
            signal("beta", SignalAction::Sell),
            signal("alpha", SignalAction::Buy),
            signal("gamma", SignalAction::Hold),
        ];

        let l = layer(ConflictPolicy::Priority);
        let first = resolver.resolve(&l, &signals, None).unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&l, &signals, None).unwrap(), first);
        }

        // Input order must not matter either.
        let mut reversed = signals.clone();
        reversed.reverse();
        assert_eq!(resolver.resolve(&l, &reversed, None).unwrap(), first);
    }

    #[test]
    fn test_group_batches_by_symbol_and_day() {
        let mut eth = signal("beta", SignalAction::Sell);
        eth.symbol = "ETHUSDT".to_string();
        let mut next_day = signal("gamma", SignalAction::Buy);
        next_day.timestamp = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();

        let events = vec![signal("alpha", SignalAction::Buy), eth, next_day];
        let batches = ConflictResolver::group_batches(&events);

        assert_eq!(batches.len(), 3);
        for batch in batches.values() {
            assert_eq!(batch.len(), 1);
        }
    }
}
