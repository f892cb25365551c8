//! Shared domain types for amp layers.
//!
//! A layer binds several independently operating strategies ("amps") to one
//! capital pool with a single allocation policy and a single conflict policy.

mod types;

pub use types::*;
