//! Layer engine: allocation, correlation, rebalancing, and conflict
//! resolution over collaborator stores.
//!
//! All components are stateless, synchronous functions of their inputs; the
//! facade only adds the collaborator I/O around them. Per-strategy fetches
//! run concurrently, and every fetch completes before any math starts.

pub mod allocator;
pub mod conflict;
pub mod correlation;
pub mod rebalancer;

pub use allocator::{CapitalAllocator, StrategyAllocation};
pub use conflict::ConflictResolver;
pub use correlation::{
    CorrelationAnalyzer, CorrelationReport, CorrelationStrength, PairCorrelation,
};
pub use rebalancer::{AllocationChange, RebalancePlan, RebalancingPlanner};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::layer::{Layer, PerformanceSnapshot, SignalAction, SignalEvent};
use crate::store::{LayerStore, PerformanceStore, SignalStore};
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Facade over the four core components and the collaborator stores.
pub struct LayerEngine {
    layers: Arc<dyn LayerStore>,
    performance: Arc<dyn PerformanceStore>,
    signals: Arc<dyn SignalStore>,
    allocator: CapitalAllocator,
    analyzer: CorrelationAnalyzer,
    planner: RebalancingPlanner,
    resolver: ConflictResolver,
}

impl LayerEngine {
    pub fn new(
        config: EngineConfig,
        layers: Arc<dyn LayerStore>,
        performance: Arc<dyn PerformanceStore>,
        signals: Arc<dyn SignalStore>,
    ) -> Self {
        Self {
            layers,
            performance,
            signals,
            allocator: CapitalAllocator::new(config.allocation),
            analyzer: CorrelationAnalyzer::new(config.correlation),
            planner: RebalancingPlanner::new(config.rebalance),
            resolver: ConflictResolver::new(),
        }
    }

    /// Compute the current target allocation for a layer.
    pub async fn allocate(
        &self,
        layer_id: &str,
        total_capital: Decimal,
        window_days: u32,
    ) -> EngineResult<Vec<StrategyAllocation>> {
        let layer = self.load_active_layer(layer_id).await?;
        let performance = self.fetch_performance(&layer, window_days).await?;
        self.allocator.allocate(&layer, total_capital, &performance)
    }

    /// Analyze signal correlation across a layer's enabled strategies.
    pub async fn analyze_correlation(
        &self,
        layer_id: &str,
        lookback_days: u32,
    ) -> EngineResult<CorrelationReport> {
        let layer = self.load_active_layer(layer_id).await?;

        let members: Vec<String> = layer
            .enabled_members()
            .map(|m| m.strategy_id.clone())
            .collect();
        if members.len() < 2 {
            return Err(EngineError::InsufficientMembers {
                required: 2,
                actual: members.len(),
            });
        }

        let fetches = members.iter().map(|strategy_id| {
            let signals = Arc::clone(&self.signals);
            let strategy_id = strategy_id.clone();
            let layer_id = layer.id.clone();
            async move {
                let events = signals
                    .get_signal_history(&strategy_id, &layer_id, lookback_days)
                    .await?;
                Ok::<_, anyhow::Error>((strategy_id, events))
            }
        });
        let histories: HashMap<String, Vec<SignalEvent>> =
            try_join_all(fetches).await?.into_iter().collect();

        self.analyzer.analyze(&histories)
    }

    /// Build a rebalance plan without writing anything.
    pub async fn plan_rebalance(
        &self,
        layer_id: &str,
        total_capital: Decimal,
        window_days: u32,
    ) -> EngineResult<RebalancePlan> {
        let layer = self.load_active_layer(layer_id).await?;
        let performance = self.fetch_performance(&layer, window_days).await?;
        let current = self.layers.get_current_allocation(layer_id).await?;

        self.planner.plan(
            &layer,
            &self.allocator,
            total_capital,
            &performance,
            &current,
        )
    }

    /// Apply a previously built plan.
    ///
    /// Writes the plan's full target set, so strategies the plan did not
    /// move keep their rows. Idempotent per plan: re-committing an
    /// already-applied plan is a no-op; any other version drift is
    /// rejected as stale. Never a duplicate mutation.
    pub async fn commit_rebalance(&self, plan: &RebalancePlan) -> EngineResult<u64> {
        match self
            .layers
            .persist_allocation(&plan.layer_id, &plan.targets, plan.base_version)
            .await?
        {
            Some(new_version) => {
                info!(
                    layer_id = %plan.layer_id,
                    version = new_version,
                    changes = plan.changes.len(),
                    "Rebalance committed"
                );
                Ok(new_version)
            }
            None => {
                let layer = self.load_layer(&plan.layer_id).await?;
                let current = self.layers.get_current_allocation(&plan.layer_id).await?;
                let already_applied = plan
                    .targets
                    .iter()
                    .all(|t| current.get(&t.strategy_id) == Some(&t.dollars))
                    && current.len() == plan.targets.len();

                if already_applied {
                    info!(
                        layer_id = %plan.layer_id,
                        "Plan already applied, commit is a no-op"
                    );
                    Ok(layer.version)
                } else {
                    Err(EngineError::StaleVersion {
                        expected: plan.base_version,
                        actual: layer.version,
                    })
                }
            }
        }
    }

    /// Resolve one batch of simultaneous signals on one instrument.
    ///
    /// The current allocation weights net-signal resolution; the other
    /// policies ignore it.
    pub async fn resolve_conflict(
        &self,
        layer_id: &str,
        signals: &[SignalEvent],
    ) -> EngineResult<SignalAction> {
        let layer = self.load_active_layer(layer_id).await?;
        let current = self.layers.get_current_allocation(layer_id).await?;
        self.resolver.resolve(&layer, signals, Some(&current))
    }

    async fn load_layer(&self, layer_id: &str) -> EngineResult<Layer> {
        self.layers
            .get_layer_config(layer_id)
            .await?
            .ok_or_else(|| EngineError::LayerNotFound(layer_id.to_string()))
    }

    async fn load_active_layer(&self, layer_id: &str) -> EngineResult<Layer> {
        let layer = self.load_layer(layer_id).await?;
        if !layer.active {
            return Err(EngineError::LayerInactive(layer_id.to_string()));
        }
        Ok(layer)
    }

    async fn fetch_performance(
        &self,
        layer: &Layer,
        window_days: u32,
    ) -> EngineResult<HashMap<String, PerformanceSnapshot>> {
        let fetches = layer.enabled_members().map(|member| {
            let performance = Arc::clone(&self.performance);
            let strategy_id = member.strategy_id.clone();
            async move {
                let snapshot = performance.get_performance(&strategy_id, window_days).await?;
                Ok::<_, anyhow::Error>((strategy_id, snapshot))
            }
        });

        // Gaps (None) are kept out of the map; the policies substitute
        // their documented low-confidence defaults.
        Ok(try_join_all(fetches)
            .await?
            .into_iter()
            .filter_map(|(id, snapshot)| snapshot.map(|s| (id, s)))
            .collect())
    }
}
