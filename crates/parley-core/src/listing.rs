//! Cache-backed listings: channels, directory status, workspace info.

use chrono::SecondsFormat;
use parley_auth_bridge::{ApiMethod, ParleyError, Result};
use parley_directory::{ChannelKind, Collection, Directory, DirectorySource};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::cursor::{decode_offset, encode_offset};
use crate::engine::QueryEngine;
use crate::render::{Table, NO_MORE_PAGES};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 999;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelSort {
    /// Directory order.
    #[default]
    None,
    /// Member count descending, then name.
    Popularity,
}

impl ChannelSort {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ChannelSort::None),
            "popularity" => Ok(ChannelSort::Popularity),
            other => Err(ParleyError::validation(
                "sort",
                format!("unknown sort `{}`; expected popularity", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelListQuery {
    /// Kinds to include; empty means all kinds.
    pub kinds: Vec<ChannelKind>,
    pub sort: ChannelSort,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl ChannelListQuery {
    /// Parse a comma-separated kind list such as `public_channel,im`.
    pub fn parse_kinds(raw: &str) -> Result<Vec<ChannelKind>> {
        let mut kinds = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let kind = ChannelKind::parse(name).ok_or_else(|| {
                ParleyError::validation(
                    "channel_types",
                    format!(
                        "unknown channel type `{}`; expected public_channel, private_channel, im or mpim",
                        name
                    ),
                )
            })?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }
}

#[derive(Debug, Deserialize)]
struct TeamInfoResponse {
    team: TeamInfo,
}

#[derive(Debug, Deserialize)]
struct TeamInfo {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    email_domain: String,
    #[serde(default)]
    enterprise_id: Option<String>,
    #[serde(default)]
    enterprise_name: Option<String>,
}

impl QueryEngine {
    /// Cached channels, filtered and paged by an opaque offset cursor.
    pub async fn channels_list(&self, query: &ChannelListQuery) -> Result<Table> {
        let limit = match query.limit {
            None => DEFAULT_LIST_LIMIT,
            Some(n) if (1..=MAX_LIST_LIMIT).contains(&n) => n,
            Some(n) => {
                return Err(ParleyError::validation(
                    "limit",
                    format!("{} must be between 1 and {}", n, MAX_LIST_LIMIT),
                ))
            }
        };
        let offset = match query.cursor.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(cursor) => decode_offset(cursor)?,
            None => 0,
        };

        let channels = self
            .cache
            .ready_channels()
            .await
            .ok_or_else(|| ParleyError::not_ready(Collection::Channels.as_str()))?;
        let mut matching: Vec<_> = channels
            .entries()
            .iter()
            .filter(|c| query.kinds.is_empty() || query.kinds.contains(&c.kind))
            .collect();
        if query.sort == ChannelSort::Popularity {
            matching.sort_by(|a, b| {
                b.member_count
                    .cmp(&a.member_count)
                    .then_with(|| a.name.cmp(&b.name))
            });
        }

        let total = matching.len();
        let end = offset.saturating_add(limit).min(total);
        let mut table = Table::new(["id", "name", "topic", "purpose", "memberCount"]);
        for channel in matching.iter().skip(offset).take(limit) {
            table.push_row(vec![
                channel.id.clone(),
                channel.selector(),
                channel.topic.clone(),
                channel.purpose.clone(),
                channel.member_count.to_string(),
            ]);
        }
        let next = (end < total).then(|| encode_offset(end));
        let returned = table.rows().len();
        table
            .meta("Total", total)
            .meta("Returned in this page", returned)
            .meta("Next cursor", next.as_deref().unwrap_or(NO_MORE_PAGES));
        Ok(table)
    }

    /// `team.info` for the resolved team. Fails when the identity spans
    /// several teams and none is pinned.
    pub async fn workspace_info(&self, cancel: &CancellationToken) -> Result<Table> {
        let body = self.read(&ApiMethod::TEAM_INFO, &[], cancel).await?;
        let TeamInfoResponse { team } = serde_json::from_value(body)?;
        let mut table = Table::new(["id", "name", "domain", "emailDomain", "enterpriseId", "enterpriseName"]);
        table.push_row(vec![
            team.id,
            team.name,
            team.domain,
            team.email_domain,
            team.enterprise_id.unwrap_or_default(),
            team.enterprise_name.unwrap_or_default(),
        ]);
        Ok(table)
    }

    /// Lifecycle of every directory collection.
    pub async fn directory_status(&self) -> Table {
        let mut table = Table::new(["collection", "ready", "stale", "source", "entries", "loadedAt", "lastError"]);
        for (collection, state) in self.cache.status().await {
            let source = match state.source {
                Some(DirectorySource::CacheFile) => "cache-file",
                Some(DirectorySource::Network) => "network",
                None => "",
            };
            table.push_row(vec![
                collection.as_str().to_string(),
                state.ready.to_string(),
                state.stale.to_string(),
                source.to_string(),
                state.entries.to_string(),
                state
                    .loaded_at
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
                state.last_error.unwrap_or_default(),
            ]);
        }
        table
    }
}
