//! The remote menu service, as a port.
//!
//! The engine never talks HTTP itself; hosts hand it an implementation of
//! [`MenuRemote`] and keep transport, serialization, and authentication
//! on their side of the seam. Scope-bearing calls take a [`ScopeFilter`]
//! where omission of a dimension means "all".

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::Scope;
use crate::domain::entities::{CategoryRecord, MenuItemPatch, MenuItemRecord};
use crate::domain::types::{Channel, ChannelScope, LocationId, TenantToken};

/// Remote failure taxonomy.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("network failure: {message}")]
    Network { message: String },
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("rate limited by the remote service")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("remote resource not found")]
    NotFound,
    #[error("response decoding failed: {message}")]
    Decode { message: String },
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Only rate limiting is worth retrying; everything else either won't
    /// get better or already changed state server-side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Location/channel restriction on a remote call. `None` means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
}

impl ScopeFilter {
    pub fn from_scope(scope: &Scope) -> Self {
        Self {
            location_id: scope.location.location().cloned(),
            channel: scope.channel.channel(),
        }
    }
}

/// Creation options beyond the name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryOptions {
    pub channel_scope: Option<ChannelScope>,
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_location_ids: Option<Vec<LocationId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_location_ids: Option<Vec<LocationId>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AvailabilityOutcome {
    pub items: Vec<MenuItemRecord>,
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkDeleteOutcome {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BulkCategoryOutcome {
    pub items: Vec<MenuItemRecord>,
}

/// The minimal remote surface the synchronization core consumes.
#[async_trait]
pub trait MenuRemote: Send + Sync {
    async fn fetch_categories(
        &self,
        tenant: &TenantToken,
        filter: &ScopeFilter,
    ) -> Result<Vec<CategoryRecord>, RemoteError>;

    async fn fetch_menu_items(
        &self,
        tenant: &TenantToken,
        filter: &ScopeFilter,
    ) -> Result<Vec<MenuItemRecord>, RemoteError>;

    async fn create_category(
        &self,
        tenant: &TenantToken,
        name: &str,
        options: &CategoryOptions,
    ) -> Result<CategoryRecord, RemoteError>;

    async fn rename_category(
        &self,
        tenant: &TenantToken,
        id: Uuid,
        name: &str,
        filter: &ScopeFilter,
    ) -> Result<CategoryRecord, RemoteError>;

    async fn delete_category(
        &self,
        tenant: &TenantToken,
        id: Uuid,
        filter: &ScopeFilter,
    ) -> Result<(), RemoteError>;

    async fn set_category_visibility(
        &self,
        tenant: &TenantToken,
        ids: &[Uuid],
        visible: bool,
        filter: &ScopeFilter,
    ) -> Result<VisibilityOutcome, RemoteError>;

    async fn update_menu_item(
        &self,
        tenant: &TenantToken,
        id: Uuid,
        patch: &MenuItemPatch,
    ) -> Result<MenuItemRecord, RemoteError>;

    async fn bulk_set_availability(
        &self,
        tenant: &TenantToken,
        ids: &[Uuid],
        active: bool,
        filter: &ScopeFilter,
    ) -> Result<AvailabilityOutcome, RemoteError>;

    async fn bulk_delete(
        &self,
        tenant: &TenantToken,
        ids: &[Uuid],
        filter: &ScopeFilter,
    ) -> Result<BulkDeleteOutcome, RemoteError>;

    async fn bulk_change_category(
        &self,
        tenant: &TenantToken,
        ids: &[Uuid],
        category: &str,
    ) -> Result<BulkCategoryOutcome, RemoteError>;
}
