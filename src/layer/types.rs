//! Layer, member, performance, and signal types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How capital is split across a layer's active strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Even split across enabled members.
    Equal,
    /// Split by each member's static weight, normalized over enabled members.
    Weighted,
    /// Performance-driven: sharpe scaled by period return, with a floor.
    Dynamic,
    /// Half-Kelly fractions from win rate and win/loss payoff ratio.
    Kelly,
}

impl std::fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationPolicy::Equal => write!(f, "equal"),
            AllocationPolicy::Weighted => write!(f, "weighted"),
            AllocationPolicy::Dynamic => write!(f, "dynamic"),
            AllocationPolicy::Kelly => write!(f, "kelly"),
        }
    }
}

/// How a disagreement between simultaneous signals is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Highest-priority enabled member wins; ties by smallest strategy id.
    Priority,
    /// Majority vote; a buy/sell tie resolves to hold.
    Voting,
    /// Sum of +1/-1/0 per member, optionally capital-weighted.
    NetSignal,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Priority => write!(f, "priority"),
            ConflictPolicy::Voting => write!(f, "voting"),
            ConflictPolicy::NetSignal => write!(f, "net_signal"),
        }
    }
}

/// A strategy's binding into a layer.
///
/// Members are disabled rather than deleted so historical allocations and
/// signal series stay attributable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerMember {
    /// Strategy ("amp") identifier.
    pub strategy_id: String,
    /// Conflict-resolution priority; higher wins, ties broken by smallest id.
    pub priority: i32,
    /// Static weight fraction in 0..1 for the weighted policy.
    /// Weights need not sum to 1 across members; they are normalized.
    pub weight: Decimal,
    /// Disabled members are skipped by every computation.
    pub enabled: bool,
}

impl LayerMember {
    pub fn new(strategy_id: impl Into<String>, priority: i32, weight: Decimal) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            priority,
            weight,
            enabled: true,
        }
    }
}

/// A named set of strategies sharing one capital pool and one policy pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub owner: String,
    pub name: String,
    /// Inactive layers are kept for history, never deleted.
    pub active: bool,
    pub allocation_policy: AllocationPolicy,
    pub conflict_policy: ConflictPolicy,
    pub members: Vec<LayerMember>,
    /// Optimistic-concurrency token, bumped on every persisted allocation.
    pub version: u64,
}

impl Layer {
    /// Members that participate in allocation, correlation, and conflicts.
    pub fn enabled_members(&self) -> impl Iterator<Item = &LayerMember> {
        self.members.iter().filter(|m| m.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_members().count()
    }

    pub fn member(&self, strategy_id: &str) -> Option<&LayerMember> {
        self.members.iter().find(|m| m.strategy_id == strategy_id)
    }
}

/// Trailing performance figures for one strategy, fetched read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Trailing win rate in 0..1.
    pub win_rate: Decimal,
    /// Average winning trade amount (positive).
    pub avg_win: Decimal,
    /// Average losing trade amount (positive magnitude).
    pub avg_loss: Decimal,
    /// Sharpe-like risk-adjusted return ratio.
    pub sharpe: Decimal,
    /// Return over the trailing period, as a fraction (0.10 = +10%).
    pub period_return: Decimal,
}

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    /// Numeric value used by net-signal resolution and daily series.
    pub fn as_score(&self) -> f64 {
        match self {
            SignalAction::Buy => 1.0,
            SignalAction::Sell => -1.0,
            SignalAction::Hold => 0.0,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// One immutable signal emitted by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub strategy_id: String,
    pub symbol: String,
    pub action: SignalAction,
    pub timestamp: DateTime<Utc>,
}

impl SignalEvent {
    pub fn new(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        action: SignalAction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            action,
            timestamp,
        }
    }

    /// Simultaneity bucket: same UTC calendar day.
    ///
    /// Used identically by correlation's daily series and conflict batching.
    pub fn day_bucket(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}
