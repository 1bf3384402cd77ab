//! Application services: the mutation orchestrator and its read paths.

pub mod backoff;
pub mod batch;
pub mod categories;
pub mod error;
pub mod items;
pub mod mutation;
pub mod remote;

use std::sync::Arc;

use tracing::info;

use crate::cache::signal::{ChangeSignal, SignalHub};
use crate::cache::store::ScopeStore;
use crate::config::SyncSettings;

use categories::CategoryService;
use items::MenuItemService;
use mutation::MutationLocks;
use remote::MenuRemote;

const SOURCE: &str = "application";

/// What a non-blocking read sees.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadState<T> {
    /// Nothing cached yet; a read-through fetch is needed.
    Loading,
    /// Fresh rows.
    Ready(Vec<T>),
    /// Stale rows still being served while a refetch converges them.
    Revalidating(Vec<T>),
}

impl<T> ReadState<T> {
    pub fn rows(&self) -> Option<&[T]> {
        match self {
            Self::Loading => None,
            Self::Ready(rows) | Self::Revalidating(rows) => Some(rows),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// The assembled engine: one store, one signal hub, one lock table, and
/// the two services that share them.
///
/// The store is the only shared mutable state; the services own every
/// write to it. Hosts read through the services and bridge the signal hub
/// to whatever cross-context transport they have.
pub struct MenuSync {
    store: Arc<ScopeStore>,
    hub: Arc<SignalHub>,
    categories: CategoryService,
    items: MenuItemService,
}

impl MenuSync {
    pub fn new(remote: Arc<dyn MenuRemote>, settings: SyncSettings) -> Self {
        let store = Arc::new(ScopeStore::new(&settings));
        let hub = Arc::new(SignalHub::new(settings.signal_capacity_non_zero()));
        let locks = Arc::new(MutationLocks::new());
        let categories = CategoryService::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&hub),
            Arc::clone(&locks),
            settings.clone(),
        );
        let items = MenuItemService::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&hub),
            Arc::clone(&locks),
            settings,
        );
        Self {
            store,
            hub,
            categories,
            items,
        }
    }

    pub fn categories(&self) -> &CategoryService {
        &self.categories
    }

    pub fn items(&self) -> &MenuItemService {
        &self.items
    }

    pub fn signals(&self) -> &Arc<SignalHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<ScopeStore> {
        &self.store
    }

    /// Apply a change signal that arrived from another context: mark the
    /// class's partitions stale so every next read refetches. Duplicate
    /// and reordered signals are dropped.
    pub fn handle_remote_signal(&self, signal: &ChangeSignal) -> bool {
        if !self.hub.ingest(signal) {
            return false;
        }
        let stale = self.store.invalidate_class(signal.class);
        info!(
            class = %signal.class,
            stale_partitions = stale,
            target_module = SOURCE,
            "Remote change signal applied"
        );
        true
    }
}
