//! Collaborator interfaces for layer config, performance, and signal data.
//!
//! The engine consumes these read-mostly stores and never owns their
//! persistence format. I/O failures propagate unchanged; timeouts, retries,
//! and cancellation are entirely the implementation's concern.

pub mod memory;
pub mod sqlite;

use crate::engine::allocator::StrategyAllocation;
use crate::layer::{Layer, PerformanceSnapshot, SignalEvent};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Layer configuration and allocation records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LayerStore: Send + Sync {
    /// Fetch a layer with its members, policies, and version token.
    async fn get_layer_config(&self, layer_id: &str) -> Result<Option<Layer>>;

    /// Current per-strategy allocation in dollars.
    async fn get_current_allocation(&self, layer_id: &str) -> Result<HashMap<String, Decimal>>;

    /// Persist a new allocation, guarded by an optimistic version token.
    ///
    /// The write must be applied only when the stored version still equals
    /// `expected_version`, and implementations must serialize writes per
    /// layer so two concurrent commits cannot interleave. Returns the new
    /// version on success, `Ok(None)` on a version mismatch.
    async fn persist_allocation(
        &self,
        layer_id: &str,
        allocations: &[StrategyAllocation],
        expected_version: u64,
    ) -> Result<Option<u64>>;
}

/// Read-only trailing performance per strategy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PerformanceStore: Send + Sync {
    /// `None` is a data gap, not an error: the allocator degrades that
    /// strategy to a documented low-confidence default.
    async fn get_performance(
        &self,
        strategy_id: &str,
        window_days: u32,
    ) -> Result<Option<PerformanceSnapshot>>;
}

/// Read-only signal history per strategy and layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn get_signal_history(
        &self,
        strategy_id: &str,
        layer_id: &str,
        window_days: u32,
    ) -> Result<Vec<SignalEvent>>;
}
