//! Echo Core: optimistic-update runtime shared by Echo caches.
//!
//! Responsibilities:
//! - tracking asynchronous write effects as auditable transactions
//! - aggregating per-scope transaction health for user-facing surfaces
//! - caching optimistic values with read-through to confirmed state
//! - broadcasting typed status changes to interested subscribers

pub mod chamber;
pub mod context;
pub mod effect;
pub mod error;
pub mod signal;
pub mod transaction;
