//! In-memory store for tests and paper mode.

use super::{LayerStore, PerformanceStore, SignalStore};
use crate::engine::allocator::StrategyAllocation;
use crate::layer::{Layer, PerformanceSnapshot, SignalEvent};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// All three collaborator stores backed by shared in-memory maps.
#[derive(Default)]
pub struct MemoryStore {
    layers: Arc<RwLock<HashMap<String, Layer>>>,
    allocations: Arc<RwLock<HashMap<String, HashMap<String, Decimal>>>>,
    performance: Arc<RwLock<HashMap<String, PerformanceSnapshot>>>,
    signals: Arc<RwLock<HashMap<String, Vec<SignalEvent>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_layer(&self, layer: Layer) {
        self.layers.write().await.insert(layer.id.clone(), layer);
    }

    pub async fn set_allocation(&self, layer_id: &str, allocation: HashMap<String, Decimal>) {
        self.allocations
            .write()
            .await
            .insert(layer_id.to_string(), allocation);
    }

    pub async fn set_performance(&self, strategy_id: &str, snapshot: PerformanceSnapshot) {
        self.performance
            .write()
            .await
            .insert(strategy_id.to_string(), snapshot);
    }

    pub async fn add_signals(&self, strategy_id: &str, mut events: Vec<SignalEvent>) {
        self.signals
            .write()
            .await
            .entry(strategy_id.to_string())
            .or_default()
            .append(&mut events);
    }

    /// Current version of a layer, for test assertions.
    pub async fn layer_version(&self, layer_id: &str) -> Option<u64> {
        self.layers.read().await.get(layer_id).map(|l| l.version)
    }
}

#[async_trait]
impl LayerStore for MemoryStore {
    async fn get_layer_config(&self, layer_id: &str) -> Result<Option<Layer>> {
        Ok(self.layers.read().await.get(layer_id).cloned())
    }

    async fn get_current_allocation(&self, layer_id: &str) -> Result<HashMap<String, Decimal>> {
        Ok(self
            .allocations
            .read()
            .await
            .get(layer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn persist_allocation(
        &self,
        layer_id: &str,
        allocations: &[StrategyAllocation],
        expected_version: u64,
    ) -> Result<Option<u64>> {
        // One write lock over both maps keeps the version check and the
        // allocation write atomic: at most one in-flight commit per layer.
        let mut layers = self.layers.write().await;
        let layer = match layers.get_mut(layer_id) {
            Some(layer) => layer,
            None => anyhow::bail!("layer not found: {layer_id}"),
        };

        if layer.version != expected_version {
            debug!(
                %layer_id,
                expected = expected_version,
                actual = layer.version,
                "Version mismatch, rejecting persist"
            );
            return Ok(None);
        }

        let map: HashMap<String, Decimal> = allocations
            .iter()
            .map(|a| (a.strategy_id.clone(), a.dollars))
            .collect();
        self.allocations
            .write()
            .await
            .insert(layer_id.to_string(), map);

        layer.version += 1;
        Ok(Some(layer.version))
    }
}

#[async_trait]
impl PerformanceStore for MemoryStore {
    async fn get_performance(
        &self,
        strategy_id: &str,
        _window_days: u32,
    ) -> Result<Option<PerformanceSnapshot>> {
        Ok(self.performance.read().await.get(strategy_id).cloned())
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn get_signal_history(
        &self,
        strategy_id: &str,
        _layer_id: &str,
        window_days: u32,
    ) -> Result<Vec<SignalEvent>> {
        let cutoff = Utc::now() - Duration::days(window_days as i64);
        Ok(self
            .signals
            .read()
            .await
            .get(strategy_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.timestamp >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
