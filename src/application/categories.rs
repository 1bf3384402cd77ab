//! Category reads and mutations.
//!
//! The service owns every write path for categories: it validates
//! locally, asks the cascade planners what one action implies, projects
//! the plan optimistically, and settles against the remote service. Reads
//! are stale-while-revalidate: a cached partition keeps serving while a
//! background fetch replaces it.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::cascade::{
    CacheView, CascadePlan, plan_create_restricted, plan_delete_cascade, plan_delete_reassign,
    plan_merge, plan_rename, plan_visibility,
};
use crate::cache::keys::Scope;
use crate::cache::signal::SignalHub;
use crate::cache::store::ScopeStore;
use crate::config::SyncSettings;
use crate::domain::entities::CategoryRecord;
use crate::domain::types::{ChannelScope, EntityClass};

use super::ReadState;
use super::backoff::{RetryPolicy, retry_rate_limited};
use super::error::{EngineError, PartialCascadeFailure};
use super::mutation::{
    MutationLocks, MutationReport, MutationRun, dispatch_rewrites, insert_category_where_visible,
    reconcile_category,
};
use super::remote::{CategoryOptions, MenuRemote, RemoteError, ScopeFilter, VisibilityOutcome};

const SOURCE: &str = "application::categories";

const METRIC_REFETCH: &str = "piatto_refetch_total";

/// How a deleted category's items are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Remove the items along with the category.
    Cascade,
    /// Repoint the items at another category first.
    Reassign(Uuid),
}

/// Input to a category create.
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub channel_scope: ChannelScope,
    pub hidden: bool,
    pub include_location_ids: Option<Vec<crate::domain::types::LocationId>>,
    pub exclude_location_ids: Option<Vec<crate::domain::types::LocationId>>,
}

impl NewCategory {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_scope: ChannelScope::All,
            hidden: false,
            include_location_ids: None,
            exclude_location_ids: None,
        }
    }

    /// Whether the category carries channel or location overlays. A
    /// restricted create may be invisible at the very scope being viewed,
    /// so it is never inserted optimistically.
    fn is_restricted(&self) -> bool {
        self.channel_scope != ChannelScope::All
            || self
                .include_location_ids
                .as_ref()
                .is_some_and(|ids| !ids.is_empty())
            || self
                .exclude_location_ids
                .as_ref()
                .is_some_and(|ids| !ids.is_empty())
    }
}

#[derive(Clone)]
pub struct CategoryService {
    store: Arc<ScopeStore>,
    remote: Arc<dyn MenuRemote>,
    hub: Arc<SignalHub>,
    locks: Arc<MutationLocks>,
    settings: SyncSettings,
}

impl CategoryService {
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
    pub fn peek(&self, scope: &Scope) -> ReadState<CategoryRecord> {
        let key = scope.rows_key();
        match self.store.categories().rows(&key) {
            None => ReadState::Loading,
            Some(rows) if self.store.categories().is_stale(&key) => ReadState::Revalidating(rows),
            Some(rows) => ReadState::Ready(rows),
        }
    }

    /// Read-through list. A stale partition serves its snapshot and
    /// revalidates in the background; an uncached one fetches inline.
    pub async fn list(&self, scope: &Scope) -> Result<Vec<CategoryRecord>, EngineError> {
        let key = scope.rows_key();
        if let Some(rows) = self.store.categories().rows(&key) {
            if self.store.categories().is_stale(&key) && !self.store.categories().fetch_in_flight(&key)
            {
                self.spawn_refresh(scope.clone());
            }
            return Ok(rows);
        }
        self.fetch_into(scope).await
    }

    async fn fetch_into(&self, scope: &Scope) -> Result<Vec<CategoryRecord>, EngineError> {
        let key = scope.rows_key();
        let generation = self.store.categories().begin_fetch(&key);
        let filter = ScopeFilter::from_scope(scope);
        match self.remote.fetch_categories(&scope.tenant, &filter).await {
            Ok(rows) => {
                counter!(METRIC_REFETCH).increment(1);
                self.store
                    .categories()
                    .complete_fetch(&key, generation, rows.clone());
                Ok(rows)
            }
            Err(error) => {
                self.store.categories().abandon_fetch(&key, generation);
                Err(error.into())
            }
        }
    }

    fn spawn_refresh(&self, scope: Scope) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(error) = service.fetch_into(&scope).await {
                warn!(
                    scope = %scope,
                    error = %error,
                    target_module = SOURCE,
                    "Background category revalidation failed"
                );
            }
        });
    }

    /// Create a category.
    ///
    /// Never optimistic: the record the server returns is inserted into
    /// the partitions it is visible in. When the category carries
    /// restrictions, every category partition of the tenant is instead
    /// invalidated and the next read decides true visibility.
    pub async fn create(
        &self,
        scope: &Scope,
        new: NewCategory,
    ) -> Result<CategoryRecord, EngineError> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::EmptyName);
        }
        let current = self.list(scope).await?;
        if current
            .iter()
            .any(|category| category.name.to_lowercase() == name.to_lowercase())
        {
            return Err(EngineError::DuplicateName { name });
        }

        let options = CategoryOptions {
            channel_scope: Some(new.channel_scope),
            hidden: new.hidden,
            include_location_ids: new.include_location_ids.clone(),
            exclude_location_ids: new.exclude_location_ids.clone(),
        };
        let record = self
            .remote
            .create_category(&scope.tenant, &name, &options)
            .await?;

        if new.is_restricted() {
            let plan = plan_create_restricted(&scope.tenant);
            if let Some(tenant) = &plan.invalidate_tenant_categories {
                let stale = self.store.invalidate_tenant_categories(tenant);
                info!(
                    tenant = %tenant,
                    stale_partitions = stale,
                    target_module = SOURCE,
                    "Restricted category created, partitions invalidated"
                );
            }
        } else {
            insert_category_where_visible(&self.store, &record);
        }
        self.hub.publish(EntityClass::Categories);
        Ok(record)
    }

    /// Rename a category and rewrite the denormalized name on every item
    /// referencing it.
    pub async fn rename(
        &self,
        scope: &Scope,
        id: Uuid,
        new_name: &str,
    ) -> Result<MutationReport<CategoryRecord>, EngineError> {
        let name = new_name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::EmptyName);
        }

        let _guard = self.locks.acquire(id).await;
        let current = self.list(scope).await?;
        let view = CacheView::capture(&self.store);
        let category = current
            .iter()
            .find(|category| category.id == id)
            .or_else(|| view.find_category(&scope.tenant, id))
            .cloned()
            .ok_or(EngineError::UnknownCategory { id })?;

        if category.name == name {
            return Ok(MutationReport::clean(category));
        }
        if view.name_taken(scope, &name, Some(id)) {
            return Err(EngineError::DuplicateName { name });
        }

        let plan = plan_rename(scope, &view, &category, &name);
        let mut run = MutationRun::begin(&self.store, "category.rename", &plan);
        run.in_flight();

        let rewrites = tokio::spawn(dispatch_rewrites(
            Arc::clone(&self.remote),
            scope.tenant.clone(),
            plan.rewrites.clone(),
            self.settings.rewrite_concurrency_non_zero(),
        ));
        let filter = ScopeFilter::from_scope(scope);
        let primary = self
            .remote
            .rename_category(&scope.tenant, id, &name, &filter)
            .await;
        let partial = await_rewrites(rewrites).await;

        match primary {
            Ok(record) => {
                run.reconcile();
                reconcile_category(&self.store, &plan, &record);
                self.settle_partial(&plan, &partial);
                self.publish(!plan.rewrites.is_empty());
                Ok(MutationReport {
                    outcome: record,
                    partial_failure: partial,
                })
            }
            Err(error) => {
                run.rollback();
                self.invalidate_ambiguous(&plan);
                Err(error.into())
            }
        }
    }

    /// Delete a category, either cascading onto its items or repointing
    /// them at a replacement first.
    ///
    /// Deleting something already gone is a no-op, not an error.
    pub async fn delete(
        &self,
        scope: &Scope,
        id: Uuid,
        mode: DeleteMode,
    ) -> Result<MutationReport<()>, EngineError> {
        let _guards = match mode {
            DeleteMode::Cascade => vec![self.locks.acquire(id).await],
            DeleteMode::Reassign(target) => self.locks.acquire_many(&[id, target]).await,
        };

        let target = match mode {
            DeleteMode::Cascade => None,
            DeleteMode::Reassign(target_id) => {
                let current = self.list(scope).await?;
                Some(
                    current
                        .iter()
                        .find(|candidate| candidate.id == target_id)
                        .cloned()
                        .ok_or(EngineError::MissingReassignTarget)?,
                )
            }
        };

        let view = CacheView::capture(&self.store);
        let category = view.find_category(&scope.tenant, id).cloned();
        let plan = match (&category, &target) {
            (Some(category), Some(target)) => plan_delete_reassign(scope, &view, category, target),
            (Some(category), None) => plan_delete_cascade(scope, &view, category),
            // Nothing cached to project; the remote call still goes out.
            (None, _) => CascadePlan::default(),
        };

        let mut run = MutationRun::begin(&self.store, "category.delete", &plan);
        run.in_flight();

        let rewrites = tokio::spawn(dispatch_rewrites(
            Arc::clone(&self.remote),
            scope.tenant.clone(),
            plan.rewrites.clone(),
            self.settings.rewrite_concurrency_non_zero(),
        ));
        let filter = ScopeFilter::from_scope(scope);
        let primary = match self.remote.delete_category(&scope.tenant, id, &filter).await {
            Err(RemoteError::NotFound) => Ok(()),
            other => other,
        };
        let partial = await_rewrites(rewrites).await;

        match primary {
            Ok(()) => {
                run.reconcile();
                self.settle_partial(&plan, &partial);
                self.publish(true);
                Ok(MutationReport {
                    outcome: (),
                    partial_failure: partial,
                })
            }
            Err(error) => {
                run.rollback();
                self.invalidate_ambiguous(&plan);
                Err(error.into())
            }
        }
    }

    /// Merge categories into a target: every locally cached source item
    /// is retargeted, the sources are deleted by direct calls, and
    /// whatever was not cached locally is left for the next fetch to
    /// reconcile.
    pub async fn merge(
        &self,
        scope: &Scope,
        source_ids: &[Uuid],
        target_id: Uuid,
    ) -> Result<MutationReport<()>, EngineError> {
        if source_ids.is_empty() {
            return Ok(MutationReport::clean(()));
        }
        let mut all_ids = source_ids.to_vec();
        all_ids.push(target_id);
        let _guards = self.locks.acquire_many(&all_ids).await;

        let current = self.list(scope).await?;
        let target = current
            .iter()
            .find(|category| category.id == target_id)
            .cloned()
            .ok_or(EngineError::MissingReassignTarget)?;

        let view = CacheView::capture(&self.store);
        let sources: Vec<CategoryRecord> = source_ids
            .iter()
            .filter_map(|id| view.find_category(&scope.tenant, *id))
            .cloned()
            .collect();

        let plan = plan_merge(scope, &view, &sources, &target);
        let mut run = MutationRun::begin(&self.store, "category.merge", &plan);
        run.in_flight();

        let rewrites = tokio::spawn(dispatch_rewrites(
            Arc::clone(&self.remote),
            scope.tenant.clone(),
            plan.rewrites.clone(),
            self.settings.rewrite_concurrency_non_zero(),
        ));

        let filter = ScopeFilter::from_scope(scope);
        let deletes = futures::future::join_all(source_ids.iter().map(|source_id| {
            let filter = filter.clone();
            async move {
                match self
                    .remote
                    .delete_category(&scope.tenant, *source_id, &filter)
                    .await
                {
                    Err(RemoteError::NotFound) => Ok(()),
                    other => other,
                }
            }
        }))
        .await;
        let primary = deletes.into_iter().collect::<Result<Vec<()>, _>>();
        let partial = await_rewrites(rewrites).await;

        match primary {
            Ok(_) => {
                run.reconcile();
                self.settle_partial(&plan, &partial);
                self.publish(true);
                Ok(MutationReport {
                    outcome: (),
                    partial_failure: partial,
                })
            }
            Err(error) => {
                run.rollback();
                // Some source deletes may have landed; neither entity
                // class can be trusted until refetched.
                let category_keys = plan.touched_category_keys();
                self.store
                    .categories()
                    .invalidate(|key| category_keys.contains(key));
                self.invalidate_ambiguous(&plan);
                Err(error.into())
            }
        }
    }

    /// Bulk-hide or bulk-show categories and every item under them.
    ///
    /// Idempotent, so rate limiting is retried with backoff.
    pub async fn set_visibility(
        &self,
        scope: &Scope,
        ids: &[Uuid],
        visible: bool,
    ) -> Result<MutationReport<VisibilityOutcome>, EngineError> {
        if ids.is_empty() {
            return Ok(MutationReport::clean(VisibilityOutcome::default()));
        }
        let _guards = self.locks.acquire_many(ids).await;

        let view = CacheView::capture(&self.store);
        let records: Vec<CategoryRecord> = ids
            .iter()
            .filter_map(|id| view.find_category(&scope.tenant, *id))
            .cloned()
            .collect();

        let plan = plan_visibility(scope, &view, &records, !visible);
        let mut run = MutationRun::begin(&self.store, "category.set_visibility", &plan);
        run.in_flight();

        let filter = ScopeFilter::from_scope(scope);
        let policy = RetryPolicy::from(&self.settings.retry);
        let primary = retry_rate_limited(&policy, "category.set_visibility", || {
            self.remote
                .set_category_visibility(&scope.tenant, ids, visible, &filter)
        })
        .await;

        match primary {
            Ok(outcome) => {
                run.reconcile();
                self.publish(true);
                Ok(MutationReport::clean(outcome))
            }
            Err(error) => {
                run.rollback();
                Err(error.into())
            }
        }
    }

    /// Mark touched item partitions untrusted after a partial cascade.
    fn settle_partial(&self, plan: &CascadePlan, partial: &Option<PartialCascadeFailure>) {
        if let Some(partial) = partial {
            let item_keys = plan.touched_item_keys();
            let stale = self.store.items().invalidate(|key| item_keys.contains(key));
            warn!(
                %partial,
                stale_partitions = stale,
                target_module = SOURCE,
                "Partial cascade failure, item partitions invalidated"
            );
        }
    }

    /// After a rollback, sub-requests that may have landed server-side
    /// leave item partitions ambiguous; invalidate instead of trusting
    /// the restored snapshot.
    fn invalidate_ambiguous(&self, plan: &CascadePlan) {
        if plan.rewrites.is_empty() {
            return;
        }
        let item_keys = plan.touched_item_keys();
        self.store.items().invalidate(|key| item_keys.contains(key));
    }

    fn publish(&self, items_changed: bool) {
        self.hub.publish(EntityClass::Categories);
        if items_changed {
            self.hub.publish(EntityClass::MenuItems);
        }
    }
}

async fn await_rewrites(
    handle: tokio::task::JoinHandle<Option<PartialCascadeFailure>>,
) -> Option<PartialCascadeFailure> {
    match handle.await {
        Ok(partial) => partial,
        Err(join_error) => {
            warn!(
                error = %join_error,
                target_module = SOURCE,
                "Rewrite batch task failed to settle"
            );
            None
        }
    }
}
