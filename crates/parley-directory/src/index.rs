//! Immutable, indexed views over one collection.
//!
//! A directory is built once from a full entry list and never mutated; the
//! cache swaps whole directories behind an `Arc` on refresh.

use std::collections::HashMap;

use crate::schema::{CachedChannel, CachedEmoji, CachedUser, Collection};

pub trait Directory: Send + Sync + Default + 'static {
    type Entry: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static;

    const COLLECTION: Collection;

    fn from_entries(entries: Vec<Self::Entry>) -> Self;

    fn entries(&self) -> &[Self::Entry];

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// `U…`, `W…` (enterprise) or `B…` (bot) followed by uppercase alphanumerics.
pub fn looks_like_user_id(s: &str) -> bool {
    has_id_shape(s, &['U', 'W', 'B'])
}

/// `C…` (channel), `G…` (private/group) or `D…` (direct message).
pub fn looks_like_channel_id(s: &str) -> bool {
    has_id_shape(s, &['C', 'G', 'D'])
}

fn has_id_shape(s: &str, prefixes: &[char]) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if prefixes.contains(&first) => {}
        _ => return false,
    }
    let rest = chars.as_str();
    rest.len() >= 6
        && rest
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[derive(Debug, Default)]
pub struct UsersDirectory {
    entries: Vec<CachedUser>,
    by_id: HashMap<String, usize>,
    by_handle: HashMap<String, usize>,
}

impl Directory for UsersDirectory {
    type Entry = CachedUser;
    const COLLECTION: Collection = Collection::Users;

    fn from_entries(entries: Vec<CachedUser>) -> Self {
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        let mut by_handle: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        for (idx, user) in entries.iter().enumerate() {
            by_id.insert(user.id.clone(), idx);
            if !user.handle.is_empty() {
                // Active accounts win a handle collision with deleted ones.
                let key = user.handle.to_lowercase();
                match by_handle.get(&key) {
                    Some(&prev) if !entries[prev].is_deleted || user.is_deleted => {}
                    _ => {
                        by_handle.insert(key, idx);
                    }
                }
            }
        }
        Self {
            entries,
            by_id,
            by_handle,
        }
    }

    fn entries(&self) -> &[CachedUser] {
        &self.entries
    }
}

impl UsersDirectory {
    pub fn get(&self, id: &str) -> Option<&CachedUser> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    pub fn by_handle(&self, handle: &str) -> Option<&CachedUser> {
        let handle = handle.strip_prefix('@').unwrap_or(handle);
        self.by_handle
            .get(&handle.to_lowercase())
            .map(|&idx| &self.entries[idx])
    }

    /// Handle and display name for a message author.
    ///
    /// Falls back to the message's own `username` and bot profile name for
    /// bots and integrations that have no directory entry.
    pub fn author_names(
        &self,
        user_id: Option<&str>,
        username: Option<&str>,
        bot_name: Option<&str>,
    ) -> (String, String) {
        if let Some(user) = user_id.and_then(|id| self.get(id)) {
            return (user.handle.clone(), user.display_name.clone());
        }
        let username = username.filter(|s| !s.is_empty());
        let bot_name = bot_name.filter(|s| !s.is_empty());
        match (username, bot_name) {
            (Some(u), Some(b)) => (u.to_string(), b.to_string()),
            (Some(u), None) => (u.to_string(), u.to_string()),
            (None, Some(b)) => (b.to_string(), b.to_string()),
            (None, None) => {
                let fallback = user_id.unwrap_or_default().to_string();
                (fallback.clone(), fallback)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ChannelsDirectory {
    entries: Vec<CachedChannel>,
    by_id: HashMap<String, usize>,
    by_selector: HashMap<String, usize>,
}

impl Directory for ChannelsDirectory {
    type Entry = CachedChannel;
    const COLLECTION: Collection = Collection::Channels;

    fn from_entries(entries: Vec<CachedChannel>) -> Self {
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_selector = HashMap::with_capacity(entries.len());
        for (idx, channel) in entries.iter().enumerate() {
            by_id.insert(channel.id.clone(), idx);
            if !channel.name.is_empty() {
                by_selector
                    .entry(channel.selector().to_lowercase())
                    .or_insert(idx);
            }
        }
        Self {
            entries,
            by_id,
            by_selector,
        }
    }

    fn entries(&self) -> &[CachedChannel] {
        &self.entries
    }
}

impl ChannelsDirectory {
    pub fn get(&self, id: &str) -> Option<&CachedChannel> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    /// Look up `#name` or `@handle`.
    pub fn by_selector(&self, selector: &str) -> Option<&CachedChannel> {
        self.by_selector
            .get(&selector.to_lowercase())
            .map(|&idx| &self.entries[idx])
    }
}

#[derive(Debug, Default)]
pub struct EmojiDirectory {
    entries: Vec<CachedEmoji>,
    by_name: HashMap<String, usize>,
}

impl Directory for EmojiDirectory {
    type Entry = CachedEmoji;
    const COLLECTION: Collection = Collection::Emoji;

    fn from_entries(entries: Vec<CachedEmoji>) -> Self {
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(idx, emoji)| (emoji.name.clone(), idx))
            .collect();
        Self { entries, by_name }
    }

    fn entries(&self) -> &[CachedEmoji] {
        &self.entries
    }
}

impl EmojiDirectory {
    pub fn get(&self, name: &str) -> Option<&CachedEmoji> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// Follow `alias_of` links (bounded) to the emoji that carries an image.
    pub fn canonical(&self, name: &str) -> Option<&CachedEmoji> {
        let mut current = self.get(name)?;
        for _ in 0..8 {
            match current.alias_of.as_deref().and_then(|target| self.get(target)) {
                Some(next) => current = next,
                None => break,
            }
        }
        Some(current)
    }
}
