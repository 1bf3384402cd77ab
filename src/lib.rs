//! piatto is a scoped cache-and-mutation synchronization core for
//! multi-location restaurant menus.
//!
//! The engine keeps multiple cached projections of the same menu entities
//! (categories, items) consistent under optimistic edits, cascading
//! mutations, per-channel and per-location visibility overlays, and
//! cross-context invalidation. Projections are partitioned by a composite
//! scope (tenant, location-or-all, channel-or-all) and every write
//! goes through a planned cascade: snapshot, optimistic projection,
//! remote settlement, reconcile or byte-exact rollback.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use piatto::application::MenuSync;
//! use piatto::application::remote::MenuRemote;
//! use piatto::cache::Scope;
//! use piatto::config::SyncSettings;
//! use piatto::domain::types::{ChannelScope, LocationScope, TenantToken};
//!
//! # async fn run(remote: Arc<dyn MenuRemote>) -> Result<(), piatto::application::error::EngineError> {
//! let engine = MenuSync::new(remote, SyncSettings::default());
//! let scope = Scope::new(TenantToken::new("t1"), LocationScope::All, ChannelScope::All);
//! let categories = engine.categories().list(&scope).await?;
//! # let _ = categories;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::{MenuSync, ReadState};
pub use application::categories::{CategoryService, DeleteMode, NewCategory};
pub use application::error::{EngineError, PartialCascadeFailure};
pub use application::items::MenuItemService;
pub use application::mutation::MutationReport;
pub use application::remote::{MenuRemote, RemoteError, ScopeFilter};
pub use cache::{ChangeSignal, Scope, ScopeKey, SignalHub, SignalTransport};
pub use config::SyncSettings;
