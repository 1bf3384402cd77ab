//! Menu entities as the remote service serves them, plus the derived-state
//! helpers the dashboard renders from.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{Channel, ChannelScope, LocationId, Price};

/// A menu category.
///
/// Identity is `id`. `name` is unique case-insensitively within the set of
/// categories visible at any single scope, and is what menu items reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: Uuid,
    pub name: String,
    pub channel_scope: ChannelScope,
    pub hidden: bool,
    pub include_location_ids: Option<Vec<LocationId>>,
    pub exclude_location_ids: Option<Vec<LocationId>>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CategoryRecord {
    /// Whether this category belongs to the projection identified by
    /// `location` / `channel` (`None` meaning the "all" dimension).
    pub fn visible_in(&self, location: Option<&LocationId>, channel: Option<Channel>) -> bool {
        if let Some(channel) = channel
            && !self.channel_scope.includes(channel)
        {
            return false;
        }
        if let Some(location) = location {
            if let Some(include) = &self.include_location_ids
                && !include.is_empty()
                && !include.contains(location)
            {
                return false;
            }
            if let Some(exclude) = &self.exclude_location_ids
                && exclude.contains(location)
            {
                return false;
            }
        }
        true
    }
}

/// A menu item.
///
/// `category` is a denormalized reference by *name*, not id: renaming a
/// category rewrites this string on every item that carries the old name,
/// in every cache partition that might hold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItemRecord {
    pub id: Uuid,
    pub name: String,
    pub price: Price,
    pub category: String,
    pub category_id: Option<Uuid>,
    pub hidden: bool,
    pub channel: ChannelScope,
    pub exclude_channel: Option<Channel>,
    pub exclude_location_ids: Vec<LocationId>,
    pub exclude_channel_at_location_ids: Vec<LocationId>,
    pub include_location_ids: Vec<LocationId>,
    pub location_id: Option<LocationId>,
}

impl MenuItemRecord {
    /// Whether this item belongs to the projection identified by
    /// `location` / `channel` (`None` meaning the "all" dimension).
    ///
    /// A channel exclusion with `exclude_channel_at_location_ids` applies
    /// only at the listed locations; with an empty list it applies
    /// everywhere.
    pub fn visible_in(&self, location: Option<&LocationId>, channel: Option<Channel>) -> bool {
        if let Some(channel) = channel {
            if !self.channel.includes(channel) {
                return false;
            }
            if self.exclude_channel == Some(channel) {
                let scoped = &self.exclude_channel_at_location_ids;
                let excluded_here = if scoped.is_empty() {
                    true
                } else {
                    location.is_some_and(|loc| scoped.contains(loc))
                };
                if excluded_here {
                    return false;
                }
            }
        }
        if let Some(location) = location {
            if let Some(own) = &self.location_id
                && own != location
            {
                return false;
            }
            if !self.include_location_ids.is_empty() && !self.include_location_ids.contains(location)
            {
                return false;
            }
            if self.exclude_location_ids.contains(location) {
                return false;
            }
        }
        true
    }
}

/// Partial update to a menu item, as the remote contract accepts it.
///
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

impl MenuItemPatch {
    /// A patch that only repoints the denormalized category name.
    pub fn retarget(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    /// A patch that only flips availability.
    pub fn availability(active: bool) -> Self {
        Self {
            hidden: Some(!active),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.category.is_none() && self.hidden.is_none()
    }

    pub fn apply_to(&self, item: &mut MenuItemRecord) {
        if let Some(name) = &self.name {
            item.name = name.clone();
        }
        if let Some(price) = self.price {
            item.price = price;
        }
        if let Some(category) = &self.category {
            item.category = category.clone();
        }
        if let Some(hidden) = self.hidden {
            item.hidden = hidden;
        }
    }
}

/// Displayed availability of a category is derived, never stored: a
/// category counts as active iff at least one of its items is active in
/// the projection being rendered.
pub fn category_is_active(category: &CategoryRecord, items: &[MenuItemRecord]) -> bool {
    items
        .iter()
        .any(|item| item.category == category.name && !item.hidden)
}

/// Ids of items whose availability differs between the two channel
/// projections of one location. Computed from indicator partitions; feeds
/// the cross-channel alert dots, nothing else.
pub fn cross_channel_alerts(dine_in: &[MenuItemRecord], online: &[MenuItemRecord]) -> Vec<Uuid> {
    dine_in
        .iter()
        .filter_map(|item| {
            let other = online.iter().find(|candidate| candidate.id == item.id)?;
            (other.hidden != item.hidden).then_some(item.id)
        })
        .collect()
}
