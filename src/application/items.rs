//! Menu-item reads and mutations.
//!
//! Same shape as the category service: local validation, cascade plan,
//! optimistic projection, settle against the remote. Bulk availability
//! and bulk delete are idempotent and retry through backoff when rate
//! limited; the single-item update is not retried.

use std::sync::Arc;

use metrics::counter;
use tracing::warn;
use uuid::Uuid;

use crate::cache::cascade::{
    CacheView, plan_bulk_availability, plan_bulk_change_category, plan_bulk_delete,
    plan_item_patch,
};
use crate::cache::keys::{Scope, ScopeKey};
use crate::cache::signal::SignalHub;
use crate::cache::store::ScopeStore;
use crate::config::SyncSettings;
use crate::domain::entities::{self, MenuItemPatch, MenuItemRecord};
use crate::domain::error::DomainError;
use crate::domain::types::{Channel, EntityClass, LocationId, TenantToken};

use super::ReadState;
use super::backoff::{RetryPolicy, retry_rate_limited};
use super::error::EngineError;
use super::mutation::{MutationLocks, MutationReport, MutationRun, reconcile_items};
use super::remote::{
    AvailabilityOutcome, BulkCategoryOutcome, BulkDeleteOutcome, MenuRemote, ScopeFilter,
};

const SOURCE: &str = "application::items";

const METRIC_REFETCH: &str = "piatto_refetch_total";

#[derive(Clone)]
pub struct MenuItemService {
    store: Arc<ScopeStore>,
    remote: Arc<dyn MenuRemote>,
    hub: Arc<SignalHub>,
    locks: Arc<MutationLocks>,
    settings: SyncSettings,
}

impl MenuItemService {
    pub(crate) fn new(
        store: Arc<ScopeStore>,
        remote: Arc<dyn MenuRemote>,
        hub: Arc<SignalHub>,
        locks: Arc<MutationLocks>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            hub,
            locks,
            settings,
        }
    }

    /// Non-blocking read of whatever the scope's partition currently
    /// holds.
    pub fn peek(&self, scope: &Scope) -> ReadState<MenuItemRecord> {
        let key = scope.rows_key();
        match self.store.items().rows(&key) {
            None => ReadState::Loading,
            Some(rows) if self.store.items().is_stale(&key) => ReadState::Revalidating(rows),
            Some(rows) => ReadState::Ready(rows),
        }
    }

    /// Read-through list with stale-while-revalidate, mirroring the
    /// category read path.
    pub async fn list(&self, scope: &Scope) -> Result<Vec<MenuItemRecord>, EngineError> {
        let key = scope.rows_key();
        if let Some(rows) = self.store.items().rows(&key) {
            if self.store.items().is_stale(&key) && !self.store.items().fetch_in_flight(&key) {
                self.spawn_refresh(scope.clone());
            }
            return Ok(rows);
        }
        self.fetch_into(scope.tenant.clone(), ScopeFilter::from_scope(scope), key)
            .await
    }

    /// Ids of items whose availability diverges between the two channels
    /// of a location, fed from the indicator partitions.
    pub async fn cross_channel_alerts(
        &self,
        tenant: &TenantToken,
        location: &LocationId,
    ) -> Result<Vec<Uuid>, EngineError> {
        let dine_in = self
            .indicator_rows(tenant, location, Channel::DineIn)
            .await?;
        let online = self.indicator_rows(tenant, location, Channel::Online).await?;
        Ok(entities::cross_channel_alerts(&dine_in, &online))
    }

    async fn indicator_rows(
        &self,
        tenant: &TenantToken,
        location: &LocationId,
        channel: Channel,
    ) -> Result<Vec<MenuItemRecord>, EngineError> {
        let key = ScopeKey::indicator(tenant.clone(), location.clone(), channel);
        if let Some(rows) = self.store.items().rows(&key) {
            if self.store.items().is_stale(&key) && !self.store.items().fetch_in_flight(&key) {
                let service = self.clone();
                let tenant = tenant.clone();
                let filter = ScopeFilter {
                    location_id: Some(location.clone()),
                    channel: Some(channel),
                };
                let stale_key = key.clone();
                tokio::spawn(async move {
                    if let Err(error) = service.fetch_into(tenant, filter, stale_key).await {
                        warn!(
                            error = %error,
                            target_module = SOURCE,
                            "Background indicator revalidation failed"
                        );
                    }
                });
            }
            return Ok(rows);
        }
        let filter = ScopeFilter {
            location_id: Some(location.clone()),
            channel: Some(channel),
        };
        self.fetch_into(tenant.clone(), filter, key).await
    }

    async fn fetch_into(
        &self,
        tenant: TenantToken,
        filter: ScopeFilter,
        key: ScopeKey,
    ) -> Result<Vec<MenuItemRecord>, EngineError> {
        let generation = self.store.items().begin_fetch(&key);
        match self.remote.fetch_menu_items(&tenant, &filter).await {
            Ok(rows) => {
                counter!(METRIC_REFETCH).increment(1);
                self.store.items().complete_fetch(&key, generation, rows.clone());
                Ok(rows)
            }
            Err(error) => {
                self.store.items().abandon_fetch(&key, generation);
                Err(error.into())
            }
        }
    }

    fn spawn_refresh(&self, scope: Scope) {
        let service = self.clone();
        tokio::spawn(async move {
            let key = scope.rows_key();
            let filter = ScopeFilter::from_scope(&scope);
            if let Err(error) = service.fetch_into(scope.tenant.clone(), filter, key).await {
                warn!(
                    scope = %scope,
                    error = %error,
                    target_module = SOURCE,
                    "Background item revalidation failed"
                );
            }
        });
    }

    /// Update one item. The patch is projected optimistically wherever
    /// the scope's fan-out holds the item; on success the server's record
    /// replaces those copies.
    pub async fn update(
        &self,
        scope: &Scope,
        id: Uuid,
        patch: MenuItemPatch,
    ) -> Result<MutationReport<MenuItemRecord>, EngineError> {
        if patch.is_empty() {
            return Err(DomainError::validation("item update carries no fields").into());
        }
        if let Some(name) = &patch.name
            && name.trim().is_empty()
        {
            return Err(DomainError::validation("item name must not be empty").into());
        }
        if let Some(category) = &patch.category {
            self.ensure_category_exists(scope, category).await?;
        }

        let _guard = self.locks.acquire(id).await;
        let view = CacheView::capture(&self.store);
        let plan = plan_item_patch(scope, &view, id, &patch);
        let mut run = MutationRun::begin(&self.store, "item.update", &plan);
        run.in_flight();

        match self.remote.update_menu_item(&scope.tenant, id, &patch).await {
            Ok(record) => {
                run.reconcile();
                reconcile_items(&self.store, &plan, std::slice::from_ref(&record));
                self.hub.publish(EntityClass::MenuItems);
                Ok(MutationReport::clean(record))
            }
            Err(error) => {
                run.rollback();
                Err(error.into())
            }
        }
    }

    /// Bulk availability toggle. Idempotent, retried when rate limited.
    pub async fn bulk_set_availability(
        &self,
        scope: &Scope,
        ids: &[Uuid],
        active: bool,
    ) -> Result<MutationReport<AvailabilityOutcome>, EngineError> {
        if ids.is_empty() {
            return Ok(MutationReport::clean(AvailabilityOutcome::default()));
        }
        let _guards = self.locks.acquire_many(ids).await;

        let view = CacheView::capture(&self.store);
        let plan = plan_bulk_availability(scope, &view, ids, !active);
        let mut run = MutationRun::begin(&self.store, "item.bulk_set_availability", &plan);
        run.in_flight();

        let filter = ScopeFilter::from_scope(scope);
        let policy = RetryPolicy::from(&self.settings.retry);
        let primary = retry_rate_limited(&policy, "item.bulk_set_availability", || {
            self.remote
                .bulk_set_availability(&scope.tenant, ids, active, &filter)
        })
        .await;

        match primary {
            Ok(outcome) => {
                run.reconcile();
                reconcile_items(&self.store, &plan, &outcome.items);
                self.hub.publish(EntityClass::MenuItems);
                Ok(MutationReport::clean(outcome))
            }
            Err(error) => {
                run.rollback();
                Err(error.into())
            }
        }
    }

    /// Bulk delete. Idempotent, retried when rate limited.
    pub async fn bulk_delete(
        &self,
        scope: &Scope,
        ids: &[Uuid],
    ) -> Result<MutationReport<BulkDeleteOutcome>, EngineError> {
        if ids.is_empty() {
            return Ok(MutationReport::clean(BulkDeleteOutcome::default()));
        }
        let _guards = self.locks.acquire_many(ids).await;

        let view = CacheView::capture(&self.store);
        let plan = plan_bulk_delete(scope, &view, ids);
        let mut run = MutationRun::begin(&self.store, "item.bulk_delete", &plan);
        run.in_flight();

        let filter = ScopeFilter::from_scope(scope);
        let policy = RetryPolicy::from(&self.settings.retry);
        let primary = retry_rate_limited(&policy, "item.bulk_delete", || {
            self.remote.bulk_delete(&scope.tenant, ids, &filter)
        })
        .await;

        match primary {
            Ok(outcome) => {
                run.reconcile();
                self.hub.publish(EntityClass::MenuItems);
                Ok(MutationReport::clean(outcome))
            }
            Err(error) => {
                run.rollback();
                Err(error.into())
            }
        }
    }

    /// Move items under another category. The target must be a category
    /// visible in the current scope; the denormalized name invariant
    /// holds because the plan rewrites the cached copies in lockstep.
    pub async fn bulk_change_category(
        &self,
        scope: &Scope,
        ids: &[Uuid],
        category_name: &str,
    ) -> Result<MutationReport<BulkCategoryOutcome>, EngineError> {
        if ids.is_empty() {
            return Ok(MutationReport::clean(BulkCategoryOutcome::default()));
        }
        let target = self.ensure_category_exists(scope, category_name).await?;
        let _guards = self.locks.acquire_many(ids).await;

        let view = CacheView::capture(&self.store);
        let plan = plan_bulk_change_category(scope, &view, ids, &target);
        let mut run = MutationRun::begin(&self.store, "item.bulk_change_category", &plan);
        run.in_flight();

        let primary = self
            .remote
            .bulk_change_category(&scope.tenant, ids, &target.name)
            .await;

        match primary {
            Ok(outcome) => {
                run.reconcile();
                reconcile_items(&self.store, &plan, &outcome.items);
                self.hub.publish(EntityClass::MenuItems);
                Ok(MutationReport::clean(outcome))
            }
            Err(error) => {
                run.rollback();
                Err(error.into())
            }
        }
    }

    /// A denormalized category reference must point at a category the
    /// current scope can see.
    async fn ensure_category_exists(
        &self,
        scope: &Scope,
        name: &str,
    ) -> Result<crate::domain::entities::CategoryRecord, EngineError> {
        let key = scope.rows_key();
        let cached = self.store.categories().rows(&key);
        let categories = match cached {
            Some(rows) => rows,
            None => {
                let generation = self.store.categories().begin_fetch(&key);
                let filter = ScopeFilter::from_scope(scope);
                match self.remote.fetch_categories(&scope.tenant, &filter).await {
                    Ok(rows) => {
                        self.store
                            .categories()
                            .complete_fetch(&key, generation, rows.clone());
                        rows
                    }
                    Err(error) => {
                        self.store.categories().abandon_fetch(&key, generation);
                        return Err(error.into());
                    }
                }
            }
        };
        categories
            .into_iter()
            .find(|category| category.name.to_lowercase() == name.to_lowercase())
            .ok_or(EngineError::MissingReassignTarget)
    }
}
