//! Directory entity types.
//!
//! These structs are also the on-disk snapshot schema: each collection is
//! stored as a JSON array of its entry type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three cached collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    Channels,
    Emoji,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Users, Collection::Channels, Collection::Emoji];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Channels => "channels",
            Collection::Emoji => "emoji",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "users" => Some(Collection::Users),
            "channels" => Some(Collection::Channels),
            "emoji" => Some(Collection::Emoji),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a collection's current data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectorySource {
    CacheFile,
    Network,
}

/// Lifecycle of one collection.
///
/// `ready` turns true after the snapshot file loads or a full network
/// population succeeds, and never turns false again. Snapshot-loaded data is
/// flagged `stale` until the network confirms it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryState {
    pub loaded_at: Option<DateTime<Utc>>,
    pub source: Option<DirectorySource>,
    pub ready: bool,
    pub stale: bool,
    pub entries: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedUser {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_deleted: bool,
    /// Extra profile attributes (title, tz, email).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
    Im,
    Mpim,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Public,
        ChannelKind::Private,
        ChannelKind::Im,
        ChannelKind::Mpim,
    ];

    /// Upstream `types` filter name.
    pub fn upstream_type(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public_channel",
            ChannelKind::Private => "private_channel",
            ChannelKind::Im => "im",
            ChannelKind::Mpim => "mpim",
        }
    }

    /// Parse either the upstream type name or the short kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public_channel" | "public" => Some(ChannelKind::Public),
            "private_channel" | "private" => Some(ChannelKind::Private),
            "im" => Some(ChannelKind::Im),
            "mpim" => Some(ChannelKind::Mpim),
            _ => None,
        }
    }

    /// Selector prefix for channels of this kind.
    pub fn sigil(&self) -> char {
        match self {
            ChannelKind::Im => '@',
            _ => '#',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedChannel {
    pub id: String,
    /// Channel name, or the counterpart's handle for direct messages.
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub purpose: String,
}

impl CachedChannel {
    /// `#name` or `@handle`.
    pub fn selector(&self) -> String {
        format!("{}{}", self.kind.sigil(), self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEmoji {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub alias_of: Option<String>,
}
