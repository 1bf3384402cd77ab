//! Scope vocabulary shared by the cache, the cascade resolver, and the
//! remote port.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque tenant identifier carried in every cache key.
///
/// The remote service authenticates the tenant out-of-band; the engine only
/// needs the token to partition the key space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantToken(String);

impl TenantToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a physical restaurant location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete sales channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    DineIn,
    Online,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::DineIn, Self::Online];

    /// The other channel. Combined views are recomputed from a channel
    /// partition and its opposite.
    pub fn opposite(self) -> Self {
        match self {
            Self::DineIn => Self::Online,
            Self::Online => Self::DineIn,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DineIn => f.write_str("dine-in"),
            Self::Online => f.write_str("online"),
        }
    }
}

/// Channel dimension of a scope: a concrete channel or the channel-agnostic
/// ("all") projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelScope {
    All,
    DineIn,
    Online,
}

impl ChannelScope {
    pub fn channel(self) -> Option<Channel> {
        match self {
            Self::All => None,
            Self::DineIn => Some(Channel::DineIn),
            Self::Online => Some(Channel::Online),
        }
    }

    pub fn includes(self, channel: Channel) -> bool {
        match self.channel() {
            None => true,
            Some(own) => own == channel,
        }
    }
}

impl From<Channel> for ChannelScope {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::DineIn => Self::DineIn,
            Channel::Online => Self::Online,
        }
    }
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel() {
            None => f.write_str("all"),
            Some(channel) => channel.fmt(f),
        }
    }
}

/// Location dimension of a scope: one location or every location of the
/// tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationScope {
    All,
    Only(LocationId),
}

impl LocationScope {
    pub fn location(&self) -> Option<&LocationId> {
        match self {
            Self::All => None,
            Self::Only(id) => Some(id),
        }
    }

    pub fn includes(&self, location: &LocationId) -> bool {
        match self {
            Self::All => true,
            Self::Only(own) => own == location,
        }
    }
}

impl From<LocationId> for LocationScope {
    fn from(id: LocationId) -> Self {
        Self::Only(id)
    }
}

impl fmt::Display for LocationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(id) => id.fmt(f),
        }
    }
}

/// The entity classes the engine caches and broadcasts about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityClass {
    Categories,
    MenuItems,
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Categories => f.write_str("categories"),
            Self::MenuItems => f.write_str("menu-items"),
        }
    }
}

/// Menu price in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(i64);

impl Price {
    pub fn from_minor_units(units: i64) -> Self {
        Self(units)
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
