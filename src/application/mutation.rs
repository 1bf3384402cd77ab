//! Mutation orchestration machinery.
//!
//! Every write follows the same arc: snapshot the partitions a cascade
//! plan touches, project the plan optimistically (synchronously, before
//! the first network await), go in flight, then either reconcile the
//! server's answer or restore the snapshots byte-for-byte. `MutationRun`
//! carries one mutation through that arc; `MutationLocks` serializes
//! mutations that target the same entity id.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use metrics::{counter, histogram};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::cascade::{CascadePlan, ItemRewrite};
use crate::cache::keys::PartitionKind;
use crate::cache::store::ScopeStore;
use crate::domain::entities::{CategoryRecord, MenuItemPatch, MenuItemRecord};
use crate::domain::types::TenantToken;

use super::batch::settle_all;
use super::error::PartialCascadeFailure;
use super::remote::MenuRemote;

const SOURCE: &str = "application::mutation";

const METRIC_OPTIMISTIC_APPLY: &str = "piatto_optimistic_apply_total";
const METRIC_RECONCILE: &str = "piatto_reconcile_total";
const METRIC_ROLLBACK: &str = "piatto_rollback_total";
const METRIC_PARTIAL_CASCADE: &str = "piatto_partial_cascade_total";
const METRIC_SETTLE_MS: &str = "piatto_mutation_settle_ms";

/// Where a mutation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    OptimisticApplied,
    InFlight,
    Reconciled,
    RolledBack,
}

/// Per-entity-id mutation serialization.
///
/// A mutation on an id with an in-flight predecessor waits for settlement
/// before computing its own snapshot; mutations on different ids overlap
/// freely.
#[derive(Default)]
pub struct MutationLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl MutationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// Acquire several ids in one stable order so two overlapping bulk
    /// mutations cannot deadlock against each other.
    pub async fn acquire_many(&self, ids: &[Uuid]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.acquire(id).await);
        }
        guards
    }
}

/// Success payload of a settled mutation.
#[derive(Debug)]
pub struct MutationReport<T> {
    pub outcome: T,
    /// Present when cascade sub-requests failed while the primary call
    /// succeeded; the touched partitions were invalidated rather than
    /// trusted.
    pub partial_failure: Option<PartialCascadeFailure>,
}

impl<T> MutationReport<T> {
    pub fn clean(outcome: T) -> Self {
        Self {
            outcome,
            partial_failure: None,
        }
    }
}

/// One mutation moving through the state machine.
///
/// Dropping a run without calling `reconcile` or `rollback` leaves the
/// optimistic projection in place; callers always settle it explicitly.
pub(crate) struct MutationRun<'a> {
    store: &'a ScopeStore,
    op: &'static str,
    categories: crate::cache::store::PartitionSnapshot<CategoryRecord>,
    items: crate::cache::store::PartitionSnapshot<MenuItemRecord>,
    started: Instant,
    phase: MutationPhase,
}

impl<'a> MutationRun<'a> {
    /// Snapshot everything the plan touches and project it optimistically.
    /// No awaits happen in here: the projection is visible to the very
    /// next read.
    pub fn begin(store: &'a ScopeStore, op: &'static str, plan: &CascadePlan) -> Self {
        let category_keys = plan.touched_category_keys();
        let item_keys = plan.touched_item_keys();
        let mut run = Self {
            store,
            op,
            categories: store.categories().snapshot(&category_keys),
            items: store.items().snapshot(&item_keys),
            started: Instant::now(),
            phase: MutationPhase::Idle,
        };

        for (key, edit) in &plan.category_edits {
            store.categories().apply(key, |rows| edit.apply(rows));
        }
        for (key, edit) in &plan.item_edits {
            store.items().apply(key, |rows| edit.apply(rows));
        }
        for key in &plan.recompute_categories {
            store.recompute_combined_categories(key);
        }
        for key in &plan.recompute_items {
            store.recompute_combined_items(key);
        }

        run.phase = MutationPhase::OptimisticApplied;
        counter!(METRIC_OPTIMISTIC_APPLY).increment(1);
        info!(
            op,
            target_module = SOURCE,
            category_partitions = category_keys.len(),
            item_partitions = item_keys.len(),
            "Optimistic projection applied"
        );
        run
    }

    pub fn phase(&self) -> MutationPhase {
        self.phase
    }

    pub fn in_flight(&mut self) {
        self.phase = MutationPhase::InFlight;
        debug!(
            op = self.op,
            target_module = SOURCE,
            phase = ?self.phase,
            "Mutation in flight"
        );
    }

    /// Primary request succeeded; the optimistic projection stands.
    pub fn reconcile(mut self) -> MutationPhase {
        self.phase = MutationPhase::Reconciled;
        counter!(METRIC_RECONCILE).increment(1);
        histogram!(METRIC_SETTLE_MS).record(self.started.elapsed().as_secs_f64() * 1_000.0);
        info!(op = self.op, target_module = SOURCE, "Mutation reconciled");
        self.phase
    }

    /// Primary request failed; every touched partition goes back to its
    /// pre-mutation snapshot, byte-for-byte.
    pub fn rollback(self) -> MutationPhase {
        counter!(METRIC_ROLLBACK).increment(1);
        histogram!(METRIC_SETTLE_MS).record(self.started.elapsed().as_secs_f64() * 1_000.0);
        warn!(
            op = self.op,
            target_module = SOURCE,
            "Mutation rolled back to snapshot"
        );
        let Self {
            store,
            categories,
            items,
            ..
        } = self;
        store.categories().restore(categories);
        store.items().restore(items);
        MutationPhase::RolledBack
    }
}

/// Dispatch the plan's per-item rewrites as a bounded best-effort batch.
///
/// Owned arguments so the batch can be spawned before the primary request
/// goes out; the primary never waits on these to resolve.
pub(crate) async fn dispatch_rewrites(
    remote: Arc<dyn MenuRemote>,
    tenant: TenantToken,
    rewrites: Vec<ItemRewrite>,
    concurrency: NonZeroUsize,
) -> Option<PartialCascadeFailure> {
    if rewrites.is_empty() {
        return None;
    }
    let tasks: Vec<_> = rewrites
        .into_iter()
        .map(|rewrite| {
            let remote = Arc::clone(&remote);
            let tenant = tenant.clone();
            let id = rewrite.item_id;
            let patch = MenuItemPatch::retarget(rewrite.category);
            (id, async move {
                remote.update_menu_item(&tenant, id, &patch).await.map(|_| ())
            })
        })
        .collect();

    let outcome = settle_all(concurrency, tasks).await;
    if outcome.all_succeeded() {
        None
    } else {
        counter!(METRIC_PARTIAL_CASCADE).increment(1);
        Some(PartialCascadeFailure {
            attempted: outcome.attempted,
            failures: outcome.failures,
        })
    }
}

/// Merge the server's authoritative category into the keys the plan
/// touched, then rebuild the combined views it marked. Partitions outside
/// the fan-out are never written; per-channel divergence stays intact.
pub(crate) fn reconcile_category(store: &ScopeStore, plan: &CascadePlan, record: &CategoryRecord) {
    for (key, _) in &plan.category_edits {
        store.categories().apply(key, |rows| {
            if let Some(cached) = rows.iter_mut().find(|cached| cached.id == record.id) {
                *cached = record.clone();
            }
        });
    }
    for key in &plan.recompute_categories {
        store.recompute_combined_categories(key);
    }
}

/// Merge authoritative items into the keys the plan touched, then rebuild
/// the combined views it marked.
pub(crate) fn reconcile_items(store: &ScopeStore, plan: &CascadePlan, records: &[MenuItemRecord]) {
    if records.is_empty() {
        return;
    }
    for (key, _) in &plan.item_edits {
        store.items().apply(key, |rows| {
            for cached in rows.iter_mut() {
                if let Some(record) = records.iter().find(|record| record.id == cached.id) {
                    *cached = record.clone();
                }
            }
        });
    }
    for key in &plan.recompute_items {
        store.recompute_combined_items(key);
    }
}

/// Append a freshly created category to every cached row partition whose
/// scope it is visible in. Never creates partitions; never duplicates.
pub(crate) fn insert_category_where_visible(store: &ScopeStore, record: &CategoryRecord) {
    for key in store.categories().keys() {
        if key.kind != PartitionKind::Rows {
            continue;
        }
        if !record.visible_in(key.location.location(), key.channel.channel()) {
            continue;
        }
        store.categories().apply(&key, |rows| {
            if !rows.iter().any(|cached| cached.id == record.id) {
                rows.push(record.clone());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;

    use crate::cache::cascade::{CategoryEdit, ItemEdit};
    use crate::cache::keys::ScopeKey;
    use crate::config::SyncSettings;
    use crate::domain::types::{Channel, ChannelScope, LocationId, Price};

    use super::*;

    fn tenant() -> TenantToken {
        TenantToken::new("t1")
    }

    fn store() -> ScopeStore {
        ScopeStore::new(&SyncSettings::default())
    }

    fn category(name: &str) -> CategoryRecord {
        CategoryRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            channel_scope: ChannelScope::All,
            hidden: false,
            include_location_ids: None,
            exclude_location_ids: None,
            created_at: datetime!(2024-03-01 12:00 UTC),
        }
    }

    fn item(name: &str, category: &str) -> MenuItemRecord {
        MenuItemRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price: Price::from_minor_units(900),
            category: category.to_string(),
            category_id: None,
            hidden: false,
            channel: ChannelScope::All,
            exclude_channel: None,
            exclude_location_ids: Vec::new(),
            exclude_channel_at_location_ids: Vec::new(),
            include_location_ids: Vec::new(),
            location_id: None,
        }
    }

    fn rows_key() -> ScopeKey {
        ScopeKey::rows(tenant(), LocationId::new("loc-1"), ChannelScope::All)
    }

    #[tokio::test]
    async fn same_id_mutations_serialize() {
        let locks = Arc::new(MutationLocks::new());
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender unblocks once the first mutation settles")
            .expect("contender task completes");
    }

    #[tokio::test]
    async fn different_ids_do_not_contend() {
        let locks = MutationLocks::new();
        let _first = locks.acquire(Uuid::new_v4()).await;
        let _second = locks.acquire(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn acquire_many_deduplicates() {
        let locks = MutationLocks::new();
        let id = Uuid::new_v4();
        let guards = locks.acquire_many(&[id, id]).await;
        assert_eq!(guards.len(), 1);
    }

    #[test]
    fn rollback_restores_snapshots_exactly() {
        let store = store();
        let drinks = category("Drinks");
        let espresso = item("Espresso", "Drinks");
        store.categories().insert(rows_key(), vec![drinks.clone()]);
        store.items().insert(rows_key(), vec![espresso.clone()]);

        let plan = CascadePlan {
            category_edits: vec![(rows_key(), CategoryEdit::Remove { id: drinks.id })],
            item_edits: vec![(
                rows_key(),
                ItemEdit::Remove {
                    ids: vec![espresso.id],
                },
            )],
            ..CascadePlan::default()
        };

        let mut run = MutationRun::begin(&store, "test.delete", &plan);
        assert_eq!(run.phase(), MutationPhase::OptimisticApplied);
        assert!(store.categories().rows(&rows_key()).expect("rows").is_empty());

        run.in_flight();
        assert_eq!(run.phase(), MutationPhase::InFlight);
        assert_eq!(run.rollback(), MutationPhase::RolledBack);

        assert_eq!(
            store.categories().rows(&rows_key()).expect("rows"),
            vec![drinks]
        );
        assert_eq!(store.items().rows(&rows_key()).expect("rows"), vec![espresso]);
    }

    #[test]
    fn reconcile_leaves_projection_standing() {
        let store = store();
        let drinks = category("Drinks");
        store.categories().insert(rows_key(), vec![drinks.clone()]);

        let plan = CascadePlan {
            category_edits: vec![(
                rows_key(),
                CategoryEdit::Rename {
                    id: drinks.id,
                    name: "Beverages".to_string(),
                },
            )],
            ..CascadePlan::default()
        };

        let mut run = MutationRun::begin(&store, "test.rename", &plan);
        run.in_flight();
        assert_eq!(run.reconcile(), MutationPhase::Reconciled);

        let rows = store.categories().rows(&rows_key()).expect("rows");
        assert_eq!(rows[0].name, "Beverages");
    }

    #[test]
    fn created_category_lands_only_where_visible() {
        let store = store();
        let loc1 = LocationId::new("loc-1");
        let loc2 = LocationId::new("loc-2");
        let key1 = ScopeKey::rows(tenant(), loc1.clone(), ChannelScope::All);
        let key2 = ScopeKey::rows(tenant(), loc2.clone(), Channel::DineIn);
        store.categories().insert(key1.clone(), Vec::new());
        store.categories().insert(key2.clone(), Vec::new());

        let mut record = category("Specials");
        record.include_location_ids = Some(vec![loc1.clone()]);

        insert_category_where_visible(&store, &record);

        assert_eq!(store.categories().rows(&key1).expect("rows").len(), 1);
        assert!(store.categories().rows(&key2).expect("rows").is_empty());

        // Re-inserting does not duplicate.
        insert_category_where_visible(&store, &record);
        assert_eq!(store.categories().rows(&key1).expect("rows").len(), 1);
    }

    #[test]
    fn reconcile_items_stays_inside_the_fanout() {
        let store = store();
        let espresso = item("Espresso", "Drinks");
        let other_key = ScopeKey::rows(tenant(), LocationId::new("loc-2"), ChannelScope::All);
        store.items().insert(rows_key(), vec![espresso.clone()]);
        store.items().insert(other_key.clone(), vec![espresso.clone()]);

        let plan = CascadePlan {
            item_edits: vec![(
                rows_key(),
                ItemEdit::SetHidden {
                    ids: vec![espresso.id],
                    hidden: true,
                },
            )],
            ..CascadePlan::default()
        };

        let mut authoritative = espresso.clone();
        authoritative.price = Price::from_minor_units(1_100);
        reconcile_items(&store, &plan, &[authoritative.clone()]);

        assert_eq!(
            store.items().rows(&rows_key()).expect("rows")[0].price,
            authoritative.price
        );
        // The untouched location keeps its own copy.
        assert_eq!(
            store.items().rows(&other_key).expect("rows")[0].price,
            espresso.price
        );
    }
}
