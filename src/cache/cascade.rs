//! Cascade planning.
//!
//! Every multi-entity side effect a single user action implies is encoded
//! here as pure data: given a mutation, the current scope, and a read-only
//! view of what is cached, the planners return a `CascadePlan` listing
//! exactly which partitions get which edits, which combined views must be
//! rebuilt from their channel halves, and which per-item rewrite requests
//! have to go out. The orchestrator applies plans; it never decides them.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::domain::entities::{CategoryRecord, MenuItemPatch, MenuItemRecord};
use crate::domain::types::TenantToken;

use super::keys::{Scope, ScopeKey, fan_out};
use super::store::ScopeStore;

/// Read-only copy of the cached partitions a planner may consult.
///
/// Captured once per mutation, before anything is touched, so every
/// decision in a plan is made against a single consistent picture of the
/// cache.
#[derive(Debug, Default)]
pub struct CacheView {
    categories: BTreeMap<ScopeKey, Vec<CategoryRecord>>,
    items: BTreeMap<ScopeKey, Vec<MenuItemRecord>>,
}

impl CacheView {
    /// Copy every cached partition out of the store.
    pub fn capture(store: &ScopeStore) -> Self {
        let mut view = Self::default();
        for key in store.categories().keys() {
            if let Some(rows) = store.categories().peek_rows(&key) {
                view.categories.insert(key, rows);
            }
        }
        for key in store.items().keys() {
            if let Some(rows) = store.items().peek_rows(&key) {
                view.items.insert(key, rows);
            }
        }
        view
    }

    pub fn with_categories(mut self, key: ScopeKey, rows: Vec<CategoryRecord>) -> Self {
        self.categories.insert(key, rows);
        self
    }

    pub fn with_items(mut self, key: ScopeKey, rows: Vec<MenuItemRecord>) -> Self {
        self.items.insert(key, rows);
        self
    }

    pub fn category_keys(&self) -> impl Iterator<Item = &ScopeKey> {
        self.categories.keys()
    }

    pub fn item_keys(&self) -> impl Iterator<Item = &ScopeKey> {
        self.items.keys()
    }

    pub fn categories_at(&self, key: &ScopeKey) -> &[CategoryRecord] {
        self.categories.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn items_at(&self, key: &ScopeKey) -> &[MenuItemRecord] {
        self.items.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// The category as cached in the current scope's row partition.
    pub fn category_in_scope(&self, scope: &Scope, id: Uuid) -> Option<&CategoryRecord> {
        self.categories_at(&scope.rows_key())
            .iter()
            .find(|category| category.id == id)
    }

    /// The category as cached under any of the tenant's partitions, the
    /// current scope's row partition preferred.
    pub fn find_category(&self, tenant: &TenantToken, id: Uuid) -> Option<&CategoryRecord> {
        self.categories
            .iter()
            .filter(|(key, _)| &key.tenant == tenant)
            .flat_map(|(_, rows)| rows.iter())
            .find(|category| category.id == id)
    }

    /// Case-insensitive name collision check against the current scope's
    /// cached category list.
    pub fn name_taken(&self, scope: &Scope, name: &str, excluding: Option<Uuid>) -> bool {
        let wanted = name.to_lowercase();
        self.categories_at(&scope.rows_key()).iter().any(|category| {
            Some(category.id) != excluding && category.name.to_lowercase() == wanted
        })
    }
}

/// One patch against a cached category partition.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryEdit {
    Remove { id: Uuid },
    Rename { id: Uuid, name: String },
    SetHidden { id: Uuid, hidden: bool },
}

impl CategoryEdit {
    pub fn apply(&self, rows: &mut Vec<CategoryRecord>) {
        match self {
            Self::Remove { id } => rows.retain(|category| category.id != *id),
            Self::Rename { id, name } => {
                if let Some(category) = rows.iter_mut().find(|category| category.id == *id) {
                    category.name = name.clone();
                }
            }
            Self::SetHidden { id, hidden } => {
                if let Some(category) = rows.iter_mut().find(|category| category.id == *id) {
                    category.hidden = *hidden;
                }
            }
        }
    }
}

/// One patch against a cached menu-item partition.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEdit {
    Remove {
        ids: Vec<Uuid>,
    },
    SetCategory {
        ids: Vec<Uuid>,
        category: String,
        category_id: Option<Uuid>,
    },
    SetHidden {
        ids: Vec<Uuid>,
        hidden: bool,
    },
    ApplyPatch {
        id: Uuid,
        patch: MenuItemPatch,
    },
}

impl ItemEdit {
    pub fn apply(&self, rows: &mut Vec<MenuItemRecord>) {
        match self {
            Self::Remove { ids } => rows.retain(|item| !ids.contains(&item.id)),
            Self::SetCategory {
                ids,
                category,
                category_id,
            } => {
                for item in rows.iter_mut().filter(|item| ids.contains(&item.id)) {
                    item.category = category.clone();
                    if category_id.is_some() {
                        item.category_id = *category_id;
                    }
                }
            }
            Self::SetHidden { ids, hidden } => {
                for item in rows.iter_mut().filter(|item| ids.contains(&item.id)) {
                    item.hidden = *hidden;
                }
            }
            Self::ApplyPatch { id, patch } => {
                if let Some(item) = rows.iter_mut().find(|item| item.id == *id) {
                    patch.apply_to(item);
                }
            }
        }
    }
}

/// A per-item rewrite request the orchestrator dispatches best-effort.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRewrite {
    pub item_id: Uuid,
    pub category: String,
}

/// Everything one mutation implies, as data.
///
/// Edits are applied to their partition directly; `recompute_*` keys name
/// combined views that must be rebuilt from their channel halves instead
/// of being written with partial data. `rewrites` are the remote sub
/// requests that persist denormalized category names item by item.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CascadePlan {
    pub category_edits: Vec<(ScopeKey, CategoryEdit)>,
    pub item_edits: Vec<(ScopeKey, ItemEdit)>,
    pub recompute_categories: Vec<ScopeKey>,
    pub recompute_items: Vec<ScopeKey>,
    pub rewrites: Vec<ItemRewrite>,
    pub invalidate_tenant_categories: Option<TenantToken>,
}

impl CascadePlan {
    pub fn is_empty(&self) -> bool {
        self.category_edits.is_empty()
            && self.item_edits.is_empty()
            && self.recompute_categories.is_empty()
            && self.recompute_items.is_empty()
            && self.rewrites.is_empty()
            && self.invalidate_tenant_categories.is_none()
    }

    /// Every category partition this plan writes, deduplicated.
    pub fn touched_category_keys(&self) -> Vec<ScopeKey> {
        let mut keys: Vec<ScopeKey> = Vec::new();
        for key in self
            .category_edits
            .iter()
            .map(|(key, _)| key)
            .chain(&self.recompute_categories)
        {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Every item partition this plan writes, deduplicated.
    pub fn touched_item_keys(&self) -> Vec<ScopeKey> {
        let mut keys: Vec<ScopeKey> = Vec::new();
        for key in self
            .item_edits
            .iter()
            .map(|(key, _)| key)
            .chain(&self.recompute_items)
        {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

/// Delete a category and everything following it, scoped.
///
/// The category and every item carrying its name are removed from each
/// directly-patchable partition; combined views are rebuilt from their
/// channel halves afterwards, which is what lets an item visible in both
/// channels survive the loss of one.
pub fn plan_delete_cascade(
    scope: &Scope,
    view: &CacheView,
    category: &CategoryRecord,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    remove_category_everywhere(&mut plan, scope, view, category.id);
    let fanout = fan_out(scope, view.item_keys());
    for key in &fanout.patch {
        let ids: Vec<Uuid> = view
            .items_at(key)
            .iter()
            .filter(|item| item.category == category.name)
            .map(|item| item.id)
            .collect();
        if !ids.is_empty() {
            plan.item_edits.push((key.clone(), ItemEdit::Remove { ids }));
        }
    }
    extend_unique(&mut plan.recompute_items, fanout.recompute_combined);
    plan
}

/// Delete a category after pointing its items at a replacement.
///
/// Items are optimistically retargeted in every affected partition and
/// queued as best-effort rewrite requests; the deletion itself never waits
/// for those to settle.
pub fn plan_delete_reassign(
    scope: &Scope,
    view: &CacheView,
    category: &CategoryRecord,
    target: &CategoryRecord,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    retarget_items(&mut plan, scope, view, &category.name, target);
    remove_category_everywhere(&mut plan, scope, view, category.id);
    plan
}

/// Rename a category and rewrite the denormalized name on every item that
/// references it, in every partition that holds a copy.
pub fn plan_rename(
    scope: &Scope,
    view: &CacheView,
    category: &CategoryRecord,
    new_name: &str,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    let fanout = fan_out(scope, view.category_keys());
    for key in &fanout.patch {
        if view
            .categories_at(key)
            .iter()
            .any(|cached| cached.id == category.id)
        {
            plan.category_edits.push((
                key.clone(),
                CategoryEdit::Rename {
                    id: category.id,
                    name: new_name.to_string(),
                },
            ));
        }
    }
    extend_unique(&mut plan.recompute_categories, fanout.recompute_combined);

    let renamed = CategoryRecord {
        name: new_name.to_string(),
        ..category.clone()
    };
    retarget_items(&mut plan, scope, view, &category.name, &renamed);
    plan
}

/// Merge several categories into one: retarget every locally cached item,
/// then drop the sources. Sources absent from the cache contribute
/// nothing; the remote authority reconciles them on the next fetch.
pub fn plan_merge(
    scope: &Scope,
    view: &CacheView,
    sources: &[CategoryRecord],
    target: &CategoryRecord,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    for source in sources {
        if source.id == target.id {
            continue;
        }
        retarget_items(&mut plan, scope, view, &source.name, target);
        remove_category_everywhere(&mut plan, scope, view, source.id);
    }
    plan
}

/// Bulk-hide or bulk-show categories together with every item sharing
/// their names. Single-channel fan-outs patch the channel and indicator
/// partitions and leave combined views to recomputation.
pub fn plan_visibility(
    scope: &Scope,
    view: &CacheView,
    categories: &[CategoryRecord],
    hidden: bool,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();

    let fanout = fan_out(scope, view.category_keys());
    for key in &fanout.patch {
        for cached in view.categories_at(key) {
            if categories.iter().any(|c| c.id == cached.id) {
                plan.category_edits.push((
                    key.clone(),
                    CategoryEdit::SetHidden {
                        id: cached.id,
                        hidden,
                    },
                ));
            }
        }
    }
    extend_unique(&mut plan.recompute_categories, fanout.recompute_combined);

    let fanout = fan_out(scope, view.item_keys());
    for key in &fanout.patch {
        let ids: Vec<Uuid> = view
            .items_at(key)
            .iter()
            .filter(|item| names.contains(&item.category.as_str()))
            .map(|item| item.id)
            .collect();
        if !ids.is_empty() {
            plan.item_edits
                .push((key.clone(), ItemEdit::SetHidden { ids, hidden }));
        }
    }
    extend_unique(&mut plan.recompute_items, fanout.recompute_combined);
    plan
}

/// A restricted create is never inserted optimistically: the new
/// category's overlays may exclude the very scope being viewed, so every
/// category partition of the tenant is invalidated and the next read
/// decides true visibility.
pub fn plan_create_restricted(tenant: &TenantToken) -> CascadePlan {
    CascadePlan {
        invalidate_tenant_categories: Some(tenant.clone()),
        ..CascadePlan::default()
    }
}

/// Patch one item wherever it is cached within the scope's reach.
pub fn plan_item_patch(
    scope: &Scope,
    view: &CacheView,
    id: Uuid,
    patch: &MenuItemPatch,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    let fanout = fan_out(scope, view.item_keys());
    for key in &fanout.patch {
        if view.items_at(key).iter().any(|item| item.id == id) {
            plan.item_edits.push((
                key.clone(),
                ItemEdit::ApplyPatch {
                    id,
                    patch: patch.clone(),
                },
            ));
        }
    }
    extend_unique(&mut plan.recompute_items, fanout.recompute_combined);
    plan
}

/// Toggle availability on a set of items, scoped.
pub fn plan_bulk_availability(
    scope: &Scope,
    view: &CacheView,
    ids: &[Uuid],
    hidden: bool,
) -> CascadePlan {
    plan_over_items(scope, view, ids, |present| ItemEdit::SetHidden {
        ids: present,
        hidden,
    })
}

/// Remove a set of items, scoped. Cross-channel survival in combined
/// views comes from recomputation, same as a cascade delete.
pub fn plan_bulk_delete(scope: &Scope, view: &CacheView, ids: &[Uuid]) -> CascadePlan {
    plan_over_items(scope, view, ids, |present| ItemEdit::Remove { ids: present })
}

/// Move a set of items under another category name.
pub fn plan_bulk_change_category(
    scope: &Scope,
    view: &CacheView,
    ids: &[Uuid],
    target: &CategoryRecord,
) -> CascadePlan {
    plan_over_items(scope, view, ids, |present| ItemEdit::SetCategory {
        ids: present,
        category: target.name.clone(),
        category_id: Some(target.id),
    })
}

fn plan_over_items(
    scope: &Scope,
    view: &CacheView,
    ids: &[Uuid],
    edit: impl Fn(Vec<Uuid>) -> ItemEdit,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    let fanout = fan_out(scope, view.item_keys());
    for key in &fanout.patch {
        let present: Vec<Uuid> = view
            .items_at(key)
            .iter()
            .filter(|item| ids.contains(&item.id))
            .map(|item| item.id)
            .collect();
        if !present.is_empty() {
            plan.item_edits.push((key.clone(), edit(present)));
        }
    }
    extend_unique(&mut plan.recompute_items, fanout.recompute_combined);
    plan
}

/// Retarget every cached item carrying `from_name` to the target
/// category, both as optimistic partition edits and as queued remote
/// rewrites. Only items actually cached within the fan-out are touched.
fn retarget_items(
    plan: &mut CascadePlan,
    scope: &Scope,
    view: &CacheView,
    from_name: &str,
    target: &CategoryRecord,
) {
    let fanout = fan_out(scope, view.item_keys());
    let mut rewritten: BTreeSet<Uuid> = BTreeSet::new();
    for key in &fanout.patch {
        let ids: Vec<Uuid> = view
            .items_at(key)
            .iter()
            .filter(|item| item.category == from_name)
            .map(|item| item.id)
            .collect();
        if !ids.is_empty() {
            rewritten.extend(ids.iter().copied());
            plan.item_edits.push((
                key.clone(),
                ItemEdit::SetCategory {
                    ids,
                    category: target.name.clone(),
                    category_id: Some(target.id),
                },
            ));
        }
    }
    for item_id in rewritten {
        plan.rewrites.push(ItemRewrite {
            item_id,
            category: target.name.clone(),
        });
    }
    extend_unique(&mut plan.recompute_items, fanout.recompute_combined);
}

fn remove_category_everywhere(
    plan: &mut CascadePlan,
    scope: &Scope,
    view: &CacheView,
    id: Uuid,
) {
    let fanout = fan_out(scope, view.category_keys());
    for key in &fanout.patch {
        if view.categories_at(key).iter().any(|cached| cached.id == id) {
            plan.category_edits
                .push((key.clone(), CategoryEdit::Remove { id }));
        }
    }
    extend_unique(&mut plan.recompute_categories, fanout.recompute_combined);
}

fn extend_unique(dst: &mut Vec<ScopeKey>, src: Vec<ScopeKey>) {
    for key in src {
        if !dst.contains(&key) {
            dst.push(key);
        }
    }
}
