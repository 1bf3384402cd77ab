//! The scoped cache: typed keys, partitioned storage, cascade planning,
//! and cross-context change signaling.
//!
//! Partitions are keyed by [`keys::ScopeKey`] (tenant × location-or-all ×
//! channel-or-all × kind) and hold independent freshness state. Writes
//! flow through [`cascade::CascadePlan`]s computed by the pure planners;
//! the store itself never decides what changes.

pub mod cascade;
pub mod keys;
mod lock;
pub mod signal;
pub mod store;

pub use cascade::{CacheView, CascadePlan, CategoryEdit, ItemEdit, ItemRewrite};
pub use keys::{Fanout, PartitionKind, Scope, ScopeKey, fan_out};
pub use signal::{ChangeSignal, SignalHub, SignalTransport};
pub use store::{Freshness, Partition, PartitionMap, PartitionSnapshot, ScopeStore};
