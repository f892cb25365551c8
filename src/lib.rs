//! # Amp Layer Engine
//!
//! Multi-strategy capital allocation and correlation coordination. Several
//! independently operating trading strategies ("amps") are combined into one
//! managed capital pool (a "layer"); this crate decides how much capital
//! each strategy controls, measures how correlated their signals are,
//! plans bounded two-phase rebalances, and resolves conflicting
//! simultaneous signals on the same instrument.
//!
//! ## Architecture
//!
//! - `config`: Engine tuning (allocation floors, Kelly clamps, rebalance
//!   bounds, correlation buckets)
//! - `layer`: Shared domain types (layers, members, signals, performance)
//! - `engine`: The four core components and the `LayerEngine` facade
//! - `store`: Collaborator traits plus in-memory and SQLite implementations
//! - `utils`: Decimal arithmetic helpers
//!
//! The core components are stateless, pure functions of their inputs; the
//! only concurrency-sensitive boundary is the store's versioned
//! `persist_allocation`.

pub mod config;
pub mod engine;
pub mod error;
pub mod layer;
pub mod store;
pub mod utils;

pub use config::EngineConfig;
pub use engine::LayerEngine;
pub use error::{EngineError, EngineResult};
