//! Full network population of each collection.

use std::collections::BTreeMap;

use parley_auth_bridge::router::next_cursor;
use parley_auth_bridge::{ApiMethod, Result, WorkspaceApi};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::index::UsersDirectory;
use crate::schema::{CachedChannel, CachedEmoji, CachedUser, ChannelKind};

const USERS_PAGE: &str = "1000";
const CHANNELS_PAGE: &str = "999";
const CHANNEL_TYPES: &str = "public_channel,private_channel,mpim,im";

/// Walk every page of `method`, handing each page body to `collect`.
async fn paginate(
    api: &dyn WorkspaceApi,
    method: &ApiMethod,
    base: &[(&str, String)],
    cancel: &CancellationToken,
    mut collect: impl FnMut(Value) -> Result<()>,
) -> Result<()> {
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;
    loop {
        let mut params = base.to_vec();
        if let Some(c) = cursor.as_ref() {
            params.push(("cursor", c.clone()));
        }
        let page = api.call(method, &params, cancel).await?;
        pages += 1;
        cursor = next_cursor(&page);
        collect(page)?;
        debug!("{}: fetched page {}", method.name, pages);
        if cursor.is_none() {
            return Ok(());
        }
    }
}

pub async fn fetch_users(api: &dyn WorkspaceApi, cancel: &CancellationToken) -> Result<Vec<CachedUser>> {
    let mut users = Vec::new();
    paginate(
        api,
        &ApiMethod::USERS_LIST,
        &[("limit", USERS_PAGE.to_string())],
        cancel,
        |page| {
            let payload: UsersPage = serde_json::from_value(page)?;
            users.extend(payload.members.into_iter().map(UserMember::into_cached));
            Ok(())
        },
    )
    .await?;
    Ok(users)
}

/// Fetch every non-archived conversation. Direct messages are named after the
/// counterpart's handle when `users` knows it, else after the counterpart ID.
pub async fn fetch_channels(
    api: &dyn WorkspaceApi,
    users: Option<&UsersDirectory>,
    cancel: &CancellationToken,
) -> Result<Vec<CachedChannel>> {
    let mut channels = Vec::new();
    paginate(
        api,
        &ApiMethod::CONVERSATIONS_LIST,
        &[
            ("types", CHANNEL_TYPES.to_string()),
            ("exclude_archived", "true".to_string()),
            ("limit", CHANNELS_PAGE.to_string()),
        ],
        cancel,
        |page| {
            let payload: ChannelsPage = serde_json::from_value(page)?;
            channels.extend(payload.channels.into_iter().map(|c| c.into_cached(users)));
            Ok(())
        },
    )
    .await?;
    Ok(channels)
}

pub async fn fetch_emoji(api: &dyn WorkspaceApi, cancel: &CancellationToken) -> Result<Vec<CachedEmoji>> {
    let page = api.call(&ApiMethod::EMOJI_LIST, &[], cancel).await?;
    let payload: EmojiPage = serde_json::from_value(page)?;
    let mut emoji: Vec<CachedEmoji> = payload
        .emoji
        .into_iter()
        .map(|(name, target)| match target.strip_prefix("alias:") {
            Some(alias) => CachedEmoji {
                name,
                url: None,
                alias_of: Some(alias.to_string()),
            },
            None => CachedEmoji {
                name,
                url: Some(target),
                alias_of: None,
            },
        })
        .collect();
    emoji.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(emoji)
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    members: Vec<UserMember>,
}

#[derive(Debug, Deserialize)]
struct UserMember {
    id: String,
    #[serde(default)]
    name: String,
    real_name: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    is_bot: bool,
    tz: Option<String>,
    #[serde(default)]
    profile: UserProfile,
}

#[derive(Debug, Default, Deserialize)]
struct UserProfile {
    real_name: Option<String>,
    display_name: Option<String>,
    title: Option<String>,
    email: Option<String>,
}

impl UserMember {
    fn into_cached(self) -> CachedUser {
        let display_name = [self.profile.real_name, self.profile.display_name, self.real_name]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| self.name.clone());

        let mut attributes = BTreeMap::new();
        for (key, value) in [
            ("title", self.profile.title),
            ("tz", self.tz),
            ("email", self.profile.email),
        ] {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                attributes.insert(key.to_string(), value);
            }
        }

        CachedUser {
            handle: if self.name.is_empty() { self.id.clone() } else { self.name },
            id: self.id,
            display_name,
            is_bot: self.is_bot,
            is_deleted: self.deleted,
            attributes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    #[serde(default)]
    channels: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    name: Option<String>,
    #[serde(default)]
    is_im: bool,
    #[serde(default)]
    is_mpim: bool,
    #[serde(default)]
    is_private: bool,
    /// Counterpart of a direct message.
    user: Option<String>,
    num_members: Option<u32>,
    topic: Option<TextValue>,
    purpose: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    #[serde(default)]
    value: String,
}

impl ChannelItem {
    fn into_cached(self, users: Option<&UsersDirectory>) -> CachedChannel {
        let kind = if self.is_im {
            ChannelKind::Im
        } else if self.is_mpim {
            ChannelKind::Mpim
        } else if self.is_private {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        };

        let name = match kind {
            ChannelKind::Im => {
                let counterpart = self.user.unwrap_or_default();
                users
                    .and_then(|dir| dir.get(&counterpart))
                    .map(|u| u.handle.clone())
                    .unwrap_or(counterpart)
            }
            _ => self.name.unwrap_or_default(),
        };

        CachedChannel {
            id: self.id,
            name,
            kind,
            member_count: self
                .num_members
                .unwrap_or(if kind == ChannelKind::Im { 2 } else { 0 }),
            topic: self.topic.map(|t| t.value).unwrap_or_default(),
            purpose: self.purpose.map(|p| p.value).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmojiPage {
    #[serde(default)]
    emoji: BTreeMap<String, String>,
}
