//! Cache key definitions and the fan-out algebra.
//!
//! A `ScopeKey` names one cached projection of the menu: tenant ×
//! location-or-all × channel-or-all, plus the partition kind. The fan-out
//! algebra decides, for a write at a given scope, which existing
//! partitions are patched directly and which combined views must instead
//! be recomputed from their channel halves.

use std::fmt;

use crate::domain::types::{Channel, ChannelScope, LocationScope, TenantToken};

/// What a partition is for.
///
/// `Rows` partitions back the visible tables. `Indicator` partitions exist
/// per concrete (location, channel) pair and feed cross-channel alert dots
/// only; they are never rendered as rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartitionKind {
    Rows,
    Indicator,
}

/// The scope a view is pinned to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    pub tenant: TenantToken,
    pub location: LocationScope,
    pub channel: ChannelScope,
}

impl Scope {
    pub fn new(
        tenant: TenantToken,
        location: impl Into<LocationScope>,
        channel: impl Into<ChannelScope>,
    ) -> Self {
        Self {
            tenant,
            location: location.into(),
            channel: channel.into(),
        }
    }

    /// The only scope that may use blunt remove-from-every-cache semantics.
    pub fn is_global(&self) -> bool {
        self.location == LocationScope::All && self.channel == ChannelScope::All
    }

    pub fn rows_key(&self) -> ScopeKey {
        ScopeKey {
            tenant: self.tenant.clone(),
            location: self.location.clone(),
            channel: self.channel,
            kind: PartitionKind::Rows,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.location, self.channel)
    }
}

/// Identifies one cache partition.
///
/// Typed, hashable, and totally ordered; the replacement for the ad hoc
/// string tuples the dashboard once used as query keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeKey {
    pub tenant: TenantToken,
    pub location: LocationScope,
    pub channel: ChannelScope,
    pub kind: PartitionKind,
}

impl ScopeKey {
    pub fn rows(
        tenant: TenantToken,
        location: impl Into<LocationScope>,
        channel: impl Into<ChannelScope>,
    ) -> Self {
        Self {
            tenant,
            location: location.into(),
            channel: channel.into(),
            kind: PartitionKind::Rows,
        }
    }

    pub fn indicator(
        tenant: TenantToken,
        location: impl Into<LocationScope>,
        channel: Channel,
    ) -> Self {
        Self {
            tenant,
            location: location.into(),
            channel: channel.into(),
            kind: PartitionKind::Indicator,
        }
    }

    /// The combined ("all-channel") rows view this key belongs under.
    pub fn combined(&self) -> Self {
        Self {
            tenant: self.tenant.clone(),
            location: self.location.clone(),
            channel: ChannelScope::All,
            kind: PartitionKind::Rows,
        }
    }

    /// The concrete-channel rows sibling of this key.
    pub fn channel_sibling(&self, channel: Channel) -> Self {
        Self {
            tenant: self.tenant.clone(),
            location: self.location.clone(),
            channel: channel.into(),
            kind: PartitionKind::Rows,
        }
    }

    /// Whether this is a combined rows view, i.e. derived, never authored.
    pub fn is_combined_rows(&self) -> bool {
        self.kind == PartitionKind::Rows && self.channel == ChannelScope::All
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PartitionKind::Rows => "rows",
            PartitionKind::Indicator => "indicator",
        };
        write!(
            f,
            "{}/{}/{}/{kind}",
            self.tenant, self.location, self.channel
        )
    }
}

/// Result of the fan-out algebra for one write.
///
/// `patch` keys receive the cascade projector directly. `recompute_combined`
/// keys are combined views that must be rebuilt from their channel halves;
/// writing partial data into them directly is never allowed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fanout {
    pub patch: Vec<ScopeKey>,
    pub recompute_combined: Vec<ScopeKey>,
}

impl Fanout {
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty() && self.recompute_combined.is_empty()
    }
}

/// Classify every existing partition of the tenant against a write at
/// `scope`.
///
/// - `(all, all)` touches every key: the only truly global scope.
/// - `(all, X)` patches channel-`X` keys across every location and marks
///   every combined view for recomputation; the opposite channel is never
///   touched.
/// - `(L, all)` patches all of `L`'s keys and nothing else: the narrowest
///   "everywhere" a non-central actor can reach.
/// - `(L, X)` patches only `(L, X)`; `(L, all)` is recompute-only.
pub fn fan_out<'a>(scope: &Scope, existing: impl IntoIterator<Item = &'a ScopeKey>) -> Fanout {
    let mut fanout = Fanout::default();

    for key in existing {
        if key.tenant != scope.tenant {
            continue;
        }

        match (&scope.location, scope.channel.channel()) {
            (LocationScope::All, None) => fanout.patch.push(key.clone()),
            (LocationScope::All, Some(channel)) => {
                if key.channel.channel() == Some(channel) {
                    fanout.patch.push(key.clone());
                } else if key.is_combined_rows() {
                    fanout.recompute_combined.push(key.clone());
                }
            }
            (LocationScope::Only(location), None) => {
                if key.location.location() == Some(location) {
                    fanout.patch.push(key.clone());
                }
            }
            (LocationScope::Only(location), Some(channel)) => {
                if key.location.location() != Some(location) {
                    continue;
                }
                if key.channel.channel() == Some(channel) {
                    fanout.patch.push(key.clone());
                } else if key.is_combined_rows() {
                    fanout.recompute_combined.push(key.clone());
                }
            }
        }
    }

    fanout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::LocationId;

    fn tenant() -> TenantToken {
        TenantToken::new("t1")
    }

    fn loc(id: &str) -> LocationId {
        LocationId::new(id)
    }

    /// The partition population of a tenant with two locations cached at
    /// every projection.
    fn existing_keys() -> Vec<ScopeKey> {
        let mut keys = Vec::new();
        keys.push(ScopeKey::rows(tenant(), LocationScope::All, ChannelScope::All));
        keys.push(ScopeKey::rows(tenant(), LocationScope::All, Channel::DineIn));
        keys.push(ScopeKey::rows(tenant(), LocationScope::All, Channel::Online));
        for id in ["loc-1", "loc-2"] {
            keys.push(ScopeKey::rows(tenant(), loc(id), ChannelScope::All));
            for channel in Channel::ALL {
                keys.push(ScopeKey::rows(tenant(), loc(id), channel));
                keys.push(ScopeKey::indicator(tenant(), loc(id), channel));
            }
        }
        keys
    }

    #[test]
    fn global_scope_patches_everything() {
        let keys = existing_keys();
        let scope = Scope::new(tenant(), LocationScope::All, ChannelScope::All);
        let fanout = fan_out(&scope, &keys);

        assert_eq!(fanout.patch.len(), keys.len());
        assert!(fanout.recompute_combined.is_empty());
    }

    #[test]
    fn channel_scope_fans_out_across_locations_but_never_touches_opposite() {
        let keys = existing_keys();
        let scope = Scope::new(tenant(), LocationScope::All, Channel::DineIn);
        let fanout = fan_out(&scope, &keys);

        assert!(
            fanout
                .patch
                .iter()
                .all(|key| key.channel == ChannelScope::DineIn)
        );
        // Rows + indicator for two locations, plus the all-location dine-in key.
        assert_eq!(fanout.patch.len(), 5);

        // Every combined view is recomputed, never patched.
        assert_eq!(fanout.recompute_combined.len(), 3);
        assert!(
            fanout
                .recompute_combined
                .iter()
                .all(ScopeKey::is_combined_rows)
        );

        let touched: Vec<_> = fanout
            .patch
            .iter()
            .chain(&fanout.recompute_combined)
            .collect();
        assert!(
            touched
                .iter()
                .all(|key| key.channel != ChannelScope::Online)
        );
    }

    #[test]
    fn single_location_all_channels_reaches_only_that_location() {
        let keys = existing_keys();
        let scope = Scope::new(tenant(), loc("loc-1"), ChannelScope::All);
        let fanout = fan_out(&scope, &keys);

        assert!(
            fanout
                .patch
                .iter()
                .all(|key| key.location.location() == Some(&loc("loc-1")))
        );
        // Combined + two channel rows + two indicators.
        assert_eq!(fanout.patch.len(), 5);
        assert!(fanout.recompute_combined.is_empty());
    }

    #[test]
    fn single_location_single_channel_recomputes_combined() {
        let keys = existing_keys();
        let scope = Scope::new(tenant(), loc("loc-1"), Channel::DineIn);
        let fanout = fan_out(&scope, &keys);

        assert_eq!(
            fanout.patch,
            vec![
                ScopeKey::rows(tenant(), loc("loc-1"), Channel::DineIn),
                ScopeKey::indicator(tenant(), loc("loc-1"), Channel::DineIn),
            ]
        );
        assert_eq!(
            fanout.recompute_combined,
            vec![ScopeKey::rows(tenant(), loc("loc-1"), ChannelScope::All)]
        );
    }

    #[test]
    fn foreign_tenant_keys_are_never_touched() {
        let mut keys = existing_keys();
        keys.push(ScopeKey::rows(
            TenantToken::new("t2"),
            LocationScope::All,
            ChannelScope::All,
        ));
        let scope = Scope::new(tenant(), LocationScope::All, ChannelScope::All);
        let fanout = fan_out(&scope, &keys);

        assert!(fanout.patch.iter().all(|key| key.tenant == tenant()));
    }

    #[test]
    fn key_ordering_is_total_and_stable() {
        let mut keys = existing_keys();
        keys.sort();
        let mut resorted = keys.clone();
        resorted.sort();
        assert_eq!(keys, resorted);
    }

    #[test]
    fn combined_and_sibling_navigation() {
        let key = ScopeKey::rows(tenant(), loc("loc-1"), Channel::DineIn);
        let combined = key.combined();
        assert!(combined.is_combined_rows());
        assert_eq!(
            combined.channel_sibling(Channel::Online),
            ScopeKey::rows(tenant(), loc("loc-1"), Channel::Online)
        );
    }
}
