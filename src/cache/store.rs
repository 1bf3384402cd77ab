//! Partitioned cache storage.
//!
//! One `PartitionMap` per entity class, keyed by `ScopeKey`, with
//! independent freshness per partition and LRU bounds. Reads never block
//! and never clear: a stale partition keeps serving its last snapshot
//! until a revalidating fetch lands (stale-while-revalidate).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::domain::entities::{CategoryRecord, MenuItemRecord};
use crate::domain::types::{Channel, EntityClass, TenantToken};

use super::keys::ScopeKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_PARTITION_HIT: &str = "piatto_partition_hit_total";
const METRIC_PARTITION_MISS: &str = "piatto_partition_miss_total";
const METRIC_PARTITION_EVICT: &str = "piatto_partition_evict_total";

/// Freshness of a cached partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// One cached projection: an ordered entity list plus freshness state.
#[derive(Debug, Clone)]
pub struct Partition<T> {
    pub rows: Vec<T>,
    pub freshness: Freshness,
    pub fetched_at: OffsetDateTime,
}

/// Byte-exact snapshot of a set of partitions, for rollback.
///
/// `None` records a key that had no partition at snapshot time; restoring
/// removes anything created there since.
#[derive(Debug)]
pub struct PartitionSnapshot<T> {
    entries: Vec<(ScopeKey, Option<Partition<T>>)>,
}

impl<T> PartitionSnapshot<T> {
    pub fn keys(&self) -> impl Iterator<Item = &ScopeKey> {
        self.entries.iter().map(|(key, _)| key)
    }
}

/// LRU-bounded map from `ScopeKey` to one partition of `T`.
pub struct PartitionMap<T> {
    partitions: RwLock<LruCache<ScopeKey, Partition<T>>>,
    pending_fetches: RwLock<HashMap<ScopeKey, u64>>,
    fetch_seq: AtomicU64,
    stale_after: Duration,
}

impl<T: Clone> PartitionMap<T> {
    pub fn new(limit: NonZeroUsize, stale_after: Duration) -> Self {
        Self {
            partitions: RwLock::new(LruCache::new(limit)),
            pending_fetches: RwLock::new(HashMap::new()),
            fetch_seq: AtomicU64::new(0),
            stale_after,
        }
    }

    /// Last known rows for a key, regardless of freshness. Never blocks.
    pub fn rows(&self, key: &ScopeKey) -> Option<Vec<T>> {
        let mut partitions = rw_write(&self.partitions, SOURCE, "rows");
        match partitions.get(key) {
            Some(partition) => {
                counter!(METRIC_PARTITION_HIT).increment(1);
                Some(partition.rows.clone())
            }
            None => {
                counter!(METRIC_PARTITION_MISS).increment(1);
                None
            }
        }
    }

    /// Rows for a key without promoting it in LRU order or counting a
    /// hit. Used for planning reads that must not disturb the cache.
    pub fn peek_rows(&self, key: &ScopeKey) -> Option<Vec<T>> {
        rw_read(&self.partitions, SOURCE, "peek_rows")
            .peek(key)
            .map(|partition| partition.rows.clone())
    }

    /// Whether a key needs revalidation: marked stale, or older than the
    /// bounded staleness window.
    pub fn is_stale(&self, key: &ScopeKey) -> bool {
        let partitions = rw_read(&self.partitions, SOURCE, "is_stale");
        match partitions.peek(key) {
            Some(partition) => {
                partition.freshness == Freshness::Stale
                    || OffsetDateTime::now_utc() - partition.fetched_at >= self.stale_after
            }
            None => true,
        }
    }

    /// Every key currently holding a partition, without touching LRU order.
    pub fn keys(&self) -> Vec<ScopeKey> {
        rw_read(&self.partitions, SOURCE, "keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Install authoritative rows for a key, fresh as of now.
    pub fn insert(&self, key: ScopeKey, rows: Vec<T>) {
        let partition = Partition {
            rows,
            freshness: Freshness::Fresh,
            fetched_at: OffsetDateTime::now_utc(),
        };
        let evicted = rw_write(&self.partitions, SOURCE, "insert").push(key, partition);
        if let Some((evicted_key, _)) = evicted {
            counter!(METRIC_PARTITION_EVICT).increment(1);
            tracing::debug!(key = %evicted_key, "Partition evicted at capacity");
        }
    }

    /// Run `updater` against the rows of an existing partition.
    ///
    /// Absent partitions are left absent: the updater is not invoked, so a
    /// write can never speculatively create an empty projection.
    pub fn apply(&self, key: &ScopeKey, updater: impl FnOnce(&mut Vec<T>)) -> bool {
        let mut partitions = rw_write(&self.partitions, SOURCE, "apply");
        match partitions.get_mut(key) {
            Some(partition) => {
                updater(&mut partition.rows);
                true
            }
            None => false,
        }
    }

    /// Mark one key stale. Data is kept and keeps serving.
    pub fn mark_stale(&self, key: &ScopeKey) -> bool {
        let mut partitions = rw_write(&self.partitions, SOURCE, "mark_stale");
        match partitions.peek_mut(key) {
            Some(partition) => {
                partition.freshness = Freshness::Stale;
                true
            }
            None => false,
        }
    }

    /// Mark every key matching `predicate` stale, returning the count.
    ///
    /// Never clears synchronously: the next read revalidates in the
    /// background while the old snapshot keeps rendering.
    pub fn invalidate(&self, predicate: impl Fn(&ScopeKey) -> bool) -> usize {
        let mut partitions = rw_write(&self.partitions, SOURCE, "invalidate");
        let matching: Vec<ScopeKey> = partitions
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            if let Some(partition) = partitions.peek_mut(key) {
                partition.freshness = Freshness::Stale;
            }
        }
        matching.len()
    }

    /// Capture the exact state of `keys` for later rollback.
    pub fn snapshot(&self, keys: &[ScopeKey]) -> PartitionSnapshot<T> {
        let partitions = rw_read(&self.partitions, SOURCE, "snapshot");
        PartitionSnapshot {
            entries: keys
                .iter()
                .map(|key| (key.clone(), partitions.peek(key).cloned()))
                .collect(),
        }
    }

    /// Restore a snapshot byte-for-byte.
    pub fn restore(&self, snapshot: PartitionSnapshot<T>) {
        let mut partitions = rw_write(&self.partitions, SOURCE, "restore");
        for (key, entry) in snapshot.entries {
            match entry {
                Some(partition) => {
                    partitions.put(key, partition);
                }
                None => {
                    partitions.pop(&key);
                }
            }
        }
    }

    /// Register an outgoing fetch for a key. The returned generation must
    /// be presented to `complete_fetch`; a later `begin_fetch` for the
    /// same key supersedes this one.
    pub fn begin_fetch(&self, key: &ScopeKey) -> u64 {
        let generation = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        rw_write(&self.pending_fetches, SOURCE, "begin_fetch").insert(key.clone(), generation);
        generation
    }

    /// Land fetched rows if the fetch is still the latest for its key.
    ///
    /// Superseded generations are dropped: switching scope cancels the
    /// now-irrelevant fetch without disturbing anything else.
    pub fn complete_fetch(&self, key: &ScopeKey, generation: u64, rows: Vec<T>) -> bool {
        {
            let mut pending = rw_write(&self.pending_fetches, SOURCE, "complete_fetch");
            if pending.get(key) != Some(&generation) {
                tracing::debug!(key = %key, generation, "Superseded fetch dropped");
                return false;
            }
            pending.remove(key);
        }
        self.insert(key.clone(), rows);
        true
    }

    /// Forget a failed fetch so the next read retries.
    pub fn abandon_fetch(&self, key: &ScopeKey, generation: u64) {
        let mut pending = rw_write(&self.pending_fetches, SOURCE, "abandon_fetch");
        if pending.get(key) == Some(&generation) {
            pending.remove(key);
        }
    }

    /// Whether a fetch is currently registered for the key.
    pub fn fetch_in_flight(&self, key: &ScopeKey) -> bool {
        rw_read(&self.pending_fetches, SOURCE, "fetch_in_flight").contains_key(key)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.partitions, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The two partition maps the engine owns: categories and menu items.
///
/// The store is the only shared mutable state in the engine. Writes go
/// through the mutation orchestrator exclusively; readers only ever read.
pub struct ScopeStore {
    categories: PartitionMap<CategoryRecord>,
    items: PartitionMap<MenuItemRecord>,
}

impl ScopeStore {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            categories: PartitionMap::new(
                settings.category_partition_limit_non_zero(),
                settings.stale_after(),
            ),
            items: PartitionMap::new(
                settings.item_partition_limit_non_zero(),
                settings.stale_after(),
            ),
        }
    }

    pub fn categories(&self) -> &PartitionMap<CategoryRecord> {
        &self.categories
    }

    pub fn items(&self) -> &PartitionMap<MenuItemRecord> {
        &self.items
    }

    /// Mark every partition of one entity class stale.
    pub fn invalidate_class(&self, class: EntityClass) -> usize {
        match class {
            EntityClass::Categories => self.categories.invalidate(|_| true),
            EntityClass::MenuItems => self.items.invalidate(|_| true),
        }
    }

    /// Mark every category partition of one tenant stale. Used by
    /// restricted-visibility creates, where true visibility is only
    /// knowable after a refetch.
    pub fn invalidate_tenant_categories(&self, tenant: &TenantToken) -> usize {
        self.categories.invalidate(|key| &key.tenant == tenant)
    }

    /// Rebuild a combined ("all-channel") category view from its two
    /// channel halves. With either half missing the view cannot be derived
    /// and is marked stale instead; the next read converges it.
    pub fn recompute_combined_categories(&self, key: &ScopeKey) {
        recompute_combined(&self.categories, key, |record| record.id, |record| {
            record.hidden
        });
    }

    /// Rebuild a combined ("all-channel") item view from its two channel
    /// halves. Same cold-cache fallback as categories.
    pub fn recompute_combined_items(&self, key: &ScopeKey) {
        recompute_combined(&self.items, key, |record| record.id, |record| record.hidden);
    }
}

/// Merge the two channel partitions into their combined view, first-seen
/// order, deduplicated by id. An entity visible in either channel survives
/// as its visible copy; one hidden in every channel that lists it is
/// dropped. Only runs when both halves are cached; a combined view is
/// derived, never authored, so partial inputs mean "mark stale" rather
/// than "guess".
fn recompute_combined<T: Clone>(
    map: &PartitionMap<T>,
    key: &ScopeKey,
    id_of: impl Fn(&T) -> Uuid,
    hidden_of: impl Fn(&T) -> bool,
) {
    if !key.is_combined_rows() {
        return;
    }
    let dine_in = map.rows(&key.channel_sibling(Channel::DineIn));
    let online = map.rows(&key.channel_sibling(Channel::Online));
    match (dine_in, online) {
        (Some(dine_in), Some(online)) => {
            let mut merged: Vec<T> = Vec::new();
            let mut seen: Vec<Uuid> = Vec::new();
            for row in dine_in.iter().chain(online.iter()) {
                let id = id_of(row);
                if seen.contains(&id) {
                    continue;
                }
                seen.push(id);
                let visible = dine_in
                    .iter()
                    .chain(online.iter())
                    .filter(|candidate| id_of(candidate) == id)
                    .find(|candidate| !hidden_of(candidate));
                if let Some(copy) = visible {
                    merged.push(copy.clone());
                }
            }
            map.apply(key, |rows| *rows = merged);
        }
        _ => {
            map.mark_stale(key);
        }
    }
}
