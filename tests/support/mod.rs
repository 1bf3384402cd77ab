//! Shared test fixtures: a scriptable in-memory remote and builders.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::macros::datetime;
use uuid::Uuid;

use piatto::application::MenuSync;
use piatto::application::remote::{
    AvailabilityOutcome, BulkCategoryOutcome, BulkDeleteOutcome, CategoryOptions, MenuRemote,
    RemoteError, ScopeFilter, VisibilityOutcome,
};
use piatto::cache::Scope;
use piatto::config::{RetrySettings, SyncSettings};
use piatto::domain::entities::{CategoryRecord, MenuItemPatch, MenuItemRecord};
use piatto::domain::types::{Channel, ChannelScope, LocationId, Price, TenantToken};

pub fn tenant() -> TenantToken {
    TenantToken::new("t1")
}

pub fn loc(id: &str) -> LocationId {
    LocationId::new(id)
}

pub fn category(name: &str) -> CategoryRecord {
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

pub fn item(name: &str, category: &str) -> MenuItemRecord {
    MenuItemRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        price: Price::from_minor_units(950),
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

pub fn item_in_channel(name: &str, category: &str, channel: Channel) -> MenuItemRecord {
    MenuItemRecord {
        channel: channel.into(),
        ..item(name, category)
    }
}

/// Engine wired to the given remote with test-friendly retry delays.
pub fn engine(remote: Arc<ScriptedRemote>) -> MenuSync {
    let settings = SyncSettings {
        retry: RetrySettings {
            max_attempts: 4,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        ..SyncSettings::default()
    };
    MenuSync::new(remote, settings)
}

/// Let spawned background work (revalidation, rewrite batches) run.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default, Clone)]
pub struct MenuState {
    pub categories: Vec<CategoryRecord>,
    pub items: Vec<MenuItemRecord>,
}

/// In-memory stand-in for the remote menu service.
///
/// Holds authoritative state, records every call by operation name, and
/// can be scripted to fail the next call(s) to a given operation.
#[derive(Default)]
pub struct ScriptedRemote {
    state: Mutex<MenuState>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, VecDeque<RemoteError>>>,
}

impl ScriptedRemote {
    pub fn new(categories: Vec<CategoryRecord>, items: Vec<MenuItemRecord>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MenuState { categories, items }),
            ..Self::default()
        })
    }

    pub fn fail_next(&self, op: &'static str, error: RemoteError) {
        self.failures
            .lock()
            .expect("failures lock")
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls().iter().filter(|name| name == &op).count()
    }

    pub fn state(&self) -> MenuState {
        self.state.lock().expect("state lock").clone()
    }

    fn gate(&self, op: &'static str) -> Result<(), RemoteError> {
        self.calls.lock().expect("calls lock").push(op.to_string());
        let scripted = self
            .failures
            .lock()
            .expect("failures lock")
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn category_visible(category: &CategoryRecord, filter: &ScopeFilter) -> bool {
    category.visible_in(filter.location_id.as_ref(), filter.channel)
}

fn item_visible(item: &MenuItemRecord, filter: &ScopeFilter) -> bool {
    item.visible_in(filter.location_id.as_ref(), filter.channel)
}

/// Restrict an entity out of the given scope the way the real service
/// records overlays. Returns true when the entity should be removed
/// outright instead.
fn exclude_item_from_scope(item: &mut MenuItemRecord, filter: &ScopeFilter) -> bool {
    match (&filter.location_id, filter.channel) {
        (None, None) => true,
        (Some(location), None) => {
            if !item.exclude_location_ids.contains(location) {
                item.exclude_location_ids.push(location.clone());
            }
            false
        }
        (None, Some(channel)) => {
            if item.channel == ChannelScope::from(channel) {
                true
            } else {
                item.exclude_channel = Some(channel);
                item.exclude_channel_at_location_ids.clear();
                false
            }
        }
        (Some(location), Some(channel)) => {
            item.exclude_channel = Some(channel);
            if !item.exclude_channel_at_location_ids.contains(location) {
                item.exclude_channel_at_location_ids.push(location.clone());
            }
            false
        }
    }
}

fn exclude_category_from_scope(category: &mut CategoryRecord, filter: &ScopeFilter) -> bool {
    match (&filter.location_id, filter.channel) {
        (None, None) => true,
        (Some(location), _) => {
            let excluded = category.exclude_location_ids.get_or_insert_with(Vec::new);
            if !excluded.contains(location) {
                excluded.push(location.clone());
            }
            false
        }
        (None, Some(channel)) => {
            if category.channel_scope == ChannelScope::from(channel) {
                true
            } else {
                category.channel_scope = ChannelScope::from(channel.opposite());
                false
            }
        }
    }
}

#[async_trait]
impl MenuRemote for ScriptedRemote {
    async fn fetch_categories(
        &self,
        _tenant: &TenantToken,
        filter: &ScopeFilter,
    ) -> Result<Vec<CategoryRecord>, RemoteError> {
        self.gate("fetch_categories")?;
        let state = self.state.lock().expect("state lock");
        Ok(state
            .categories
            .iter()
            .filter(|category| category_visible(category, filter))
            .cloned()
            .collect())
    }

    async fn fetch_menu_items(
        &self,
        _tenant: &TenantToken,
        filter: &ScopeFilter,
    ) -> Result<Vec<MenuItemRecord>, RemoteError> {
        self.gate("fetch_menu_items")?;
        let state = self.state.lock().expect("state lock");
        Ok(state
            .items
            .iter()
            .filter(|item| item_visible(item, filter))
            .cloned()
            .collect())
    }

    async fn create_category(
        &self,
        _tenant: &TenantToken,
        name: &str,
        options: &CategoryOptions,
    ) -> Result<CategoryRecord, RemoteError> {
        self.gate("create_category")?;
        let record = CategoryRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            channel_scope: options.channel_scope.unwrap_or(ChannelScope::All),
            hidden: options.hidden,
            include_location_ids: options.include_location_ids.clone(),
            exclude_location_ids: options.exclude_location_ids.clone(),
            created_at: datetime!(2024-03-02 09:00 UTC),
        };
        self.state
            .lock()
            .expect("state lock")
            .categories
            .push(record.clone());
        Ok(record)
    }

    async fn rename_category(
        &self,
        _tenant: &TenantToken,
        id: Uuid,
        name: &str,
        _filter: &ScopeFilter,
    ) -> Result<CategoryRecord, RemoteError> {
        self.gate("rename_category")?;
        let mut state = self.state.lock().expect("state lock");
        let category = state
            .categories
            .iter_mut()
            .find(|category| category.id == id)
            .ok_or(RemoteError::NotFound)?;
        category.name = name.to_string();
        Ok(category.clone())
    }

    async fn delete_category(
        &self,
        _tenant: &TenantToken,
        id: Uuid,
        filter: &ScopeFilter,
    ) -> Result<(), RemoteError> {
        self.gate("delete_category")?;
        let mut state = self.state.lock().expect("state lock");
        let position = state
            .categories
            .iter()
            .position(|category| category.id == id)
            .ok_or(RemoteError::NotFound)?;
        let name = state.categories[position].name.clone();
        if exclude_category_from_scope(&mut state.categories[position], filter) {
            state.categories.remove(position);
        }
        let mut kept = Vec::new();
        for mut item in std::mem::take(&mut state.items) {
            if item.category != name || !exclude_item_from_scope(&mut item, filter) {
                kept.push(item);
            }
        }
        state.items = kept;
        Ok(())
    }

    async fn set_category_visibility(
        &self,
        _tenant: &TenantToken,
        ids: &[Uuid],
        visible: bool,
        _filter: &ScopeFilter,
    ) -> Result<VisibilityOutcome, RemoteError> {
        self.gate("set_category_visibility")?;
        let mut state = self.state.lock().expect("state lock");
        let mut matched = 0;
        let mut names = Vec::new();
        for category in state
            .categories
            .iter_mut()
            .filter(|category| ids.contains(&category.id))
        {
            matched += 1;
            category.hidden = !visible;
            names.push(category.name.clone());
        }
        let mut modified = 0;
        for item in state
            .items
            .iter_mut()
            .filter(|item| names.contains(&item.category))
        {
            modified += 1;
            item.hidden = !visible;
        }
        Ok(VisibilityOutcome {
            matched_count: matched,
            modified_count: modified,
        })
    }

    async fn update_menu_item(
        &self,
        _tenant: &TenantToken,
        id: Uuid,
        patch: &MenuItemPatch,
    ) -> Result<MenuItemRecord, RemoteError> {
        self.gate("update_menu_item")?;
        let mut state = self.state.lock().expect("state lock");
        let item = state
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(RemoteError::NotFound)?;
        patch.apply_to(item);
        Ok(item.clone())
    }

    async fn bulk_set_availability(
        &self,
        _tenant: &TenantToken,
        ids: &[Uuid],
        active: bool,
        _filter: &ScopeFilter,
    ) -> Result<AvailabilityOutcome, RemoteError> {
        self.gate("bulk_set_availability")?;
        let mut state = self.state.lock().expect("state lock");
        let mut outcome = AvailabilityOutcome::default();
        for item in state.items.iter_mut().filter(|item| ids.contains(&item.id)) {
            outcome.matched_count += 1;
            if item.hidden == active {
                outcome.modified_count += 1;
            }
            item.hidden = !active;
            outcome.items.push(item.clone());
        }
        Ok(outcome)
    }

    async fn bulk_delete(
        &self,
        _tenant: &TenantToken,
        ids: &[Uuid],
        filter: &ScopeFilter,
    ) -> Result<BulkDeleteOutcome, RemoteError> {
        self.gate("bulk_delete")?;
        let mut state = self.state.lock().expect("state lock");
        let mut deleted = 0;
        let mut kept = Vec::new();
        for mut item in std::mem::take(&mut state.items) {
            if ids.contains(&item.id) && exclude_item_from_scope(&mut item, filter) {
                deleted += 1;
            } else {
                kept.push(item);
            }
        }
        state.items = kept;
        Ok(BulkDeleteOutcome {
            deleted_count: deleted,
        })
    }

    async fn bulk_change_category(
        &self,
        _tenant: &TenantToken,
        ids: &[Uuid],
        category: &str,
    ) -> Result<BulkCategoryOutcome, RemoteError> {
        self.gate("bulk_change_category")?;
        let mut state = self.state.lock().expect("state lock");
        let category_id = state
            .categories
            .iter()
            .find(|candidate| candidate.name == category)
            .map(|candidate| candidate.id);
        let mut outcome = BulkCategoryOutcome::default();
        for item in state.items.iter_mut().filter(|item| ids.contains(&item.id)) {
            item.category = category.to_string();
            item.category_id = category_id;
            outcome.items.push(item.clone());
        }
        Ok(outcome)
    }
}

/// Prime the engine's partitions for a scope by reading through it.
pub async fn prime(engine: &MenuSync, scope: &Scope) {
    engine
        .categories()
        .list(scope)
        .await
        .expect("prime categories");
    engine.items().list(scope).await.expect("prime items");
}
