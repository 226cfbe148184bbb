//! The metadata cache: one slot per collection, each holding an immutable
//! directory snapshot that refreshes replace wholesale.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_auth_bridge::{ParleyError, Result, WorkspaceApi};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::fetch;
use crate::index::{
    looks_like_channel_id, looks_like_user_id, ChannelsDirectory, Directory, EmojiDirectory,
    UsersDirectory,
};
use crate::schema::{Collection, DirectorySource, DirectoryState};
use crate::snapshot;

/// Snapshot file location per collection.
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub users: PathBuf,
    pub channels: PathBuf,
    pub emoji: PathBuf,
}

impl SnapshotPaths {
    /// Default file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            users: dir.join("users_cache.json"),
            channels: dir.join("channels_cache.json"),
            emoji: dir.join("emoji_cache.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { entries: usize },
    /// Another refresh of the same collection was in flight; nothing was done.
    AlreadyRunning,
}

struct SlotData<D> {
    directory: Arc<D>,
    state: DirectoryState,
}

struct Slot<D> {
    data: RwLock<SlotData<D>>,
    refreshing: AtomicBool,
    path: PathBuf,
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<D: Directory> Slot<D> {
    fn new(path: PathBuf) -> Self {
        Self {
            data: RwLock::new(SlotData {
                directory: Arc::new(D::default()),
                state: DirectoryState::default(),
            }),
            refreshing: AtomicBool::new(false),
            path,
        }
    }

    async fn snapshot(&self) -> (Arc<D>, DirectoryState) {
        let data = self.data.read().await;
        (Arc::clone(&data.directory), data.state.clone())
    }

    async fn ready(&self) -> Option<Arc<D>> {
        let data = self.data.read().await;
        data.state.ready.then(|| Arc::clone(&data.directory))
    }

    fn try_begin(&self) -> Option<RefreshGuard<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard(&self.refreshing))
    }

    /// Mark the collection ready from its on-disk snapshot, flagged stale.
    async fn load_snapshot(&self) -> bool {
        let Some(entries) = snapshot::load::<D::Entry>(&self.path).await else {
            return false;
        };
        let loaded_at = match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(_) => Utc::now(),
        };
        let count = entries.len();
        let mut data = self.data.write().await;
        data.directory = Arc::new(D::from_entries(entries));
        data.state = DirectoryState {
            loaded_at: Some(loaded_at),
            source: Some(DirectorySource::CacheFile),
            ready: true,
            stale: true,
            entries: count,
            last_error: None,
        };
        info!(
            "{} directory loaded from {} ({} entries)",
            D::COLLECTION,
            self.path.display(),
            count
        );
        true
    }

    /// Apply the result of a full fetch.
    ///
    /// Success persists the snapshot and swaps the directory in one step.
    /// Failure only records `last_error`; existing data and readiness stay.
    async fn commit(&self, fetched: Result<Vec<D::Entry>>) -> Result<RefreshOutcome> {
        let entries = match fetched {
            Ok(entries) => entries,
            Err(err) => {
                if !matches!(err, ParleyError::Cancelled) {
                    self.data.write().await.state.last_error = Some(err.to_string());
                }
                return Err(err);
            }
        };

        let count = entries.len();
        let persist_error = match snapshot::store(&self.path, &entries).await {
            Ok(()) => None,
            Err(err) => {
                warn!(
                    "{} snapshot write to {} failed: {}",
                    D::COLLECTION,
                    self.path.display(),
                    err
                );
                Some(format!("snapshot write failed: {}", err))
            }
        };

        let directory = Arc::new(D::from_entries(entries));
        let mut data = self.data.write().await;
        data.directory = directory;
        data.state = DirectoryState {
            loaded_at: Some(Utc::now()),
            source: Some(DirectorySource::Network),
            ready: true,
            stale: false,
            entries: count,
            last_error: persist_error,
        };
        Ok(RefreshOutcome::Refreshed { entries: count })
    }
}

/// Users, channels and emoji directories with per-collection readiness.
///
/// Constructed once at startup and shared behind an `Arc`. Readers get a
/// consistent `Arc` snapshot; only `refresh` replaces data.
pub struct MetadataCache {
    api: Arc<dyn WorkspaceApi>,
    users: Slot<UsersDirectory>,
    channels: Slot<ChannelsDirectory>,
    emoji: Slot<EmojiDirectory>,
}

impl MetadataCache {
    /// Empty cache; every collection starts not ready.
    pub fn new(api: Arc<dyn WorkspaceApi>, paths: SnapshotPaths) -> Self {
        Self {
            api,
            users: Slot::new(paths.users),
            channels: Slot::new(paths.channels),
            emoji: Slot::new(paths.emoji),
        }
    }

    /// Build the cache and load whatever snapshots exist on disk.
    pub async fn load(api: Arc<dyn WorkspaceApi>, paths: SnapshotPaths) -> Self {
        let cache = Self::new(api, paths);
        let (users, channels, emoji) = tokio::join!(
            cache.users.load_snapshot(),
            cache.channels.load_snapshot(),
            cache.emoji.load_snapshot(),
        );
        debug!(
            "snapshot load: users={} channels={} emoji={}",
            users, channels, emoji
        );
        cache
    }

    pub async fn users(&self) -> (Arc<UsersDirectory>, DirectoryState) {
        self.users.snapshot().await
    }

    pub async fn channels(&self) -> (Arc<ChannelsDirectory>, DirectoryState) {
        self.channels.snapshot().await
    }

    pub async fn emoji(&self) -> (Arc<EmojiDirectory>, DirectoryState) {
        self.emoji.snapshot().await
    }

    /// Users directory, only if it has been populated.
    pub async fn ready_users(&self) -> Option<Arc<UsersDirectory>> {
        self.users.ready().await
    }

    pub async fn ready_channels(&self) -> Option<Arc<ChannelsDirectory>> {
        self.channels.ready().await
    }

    pub async fn state(&self, collection: Collection) -> DirectoryState {
        match collection {
            Collection::Users => self.users.snapshot().await.1,
            Collection::Channels => self.channels.snapshot().await.1,
            Collection::Emoji => self.emoji.snapshot().await.1,
        }
    }

    pub async fn status(&self) -> Vec<(Collection, DirectoryState)> {
        let mut out = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            out.push((collection, self.state(collection).await));
        }
        out
    }

    /// Run one full network population of `collection`.
    ///
    /// Concurrent refreshes of the same collection collapse: the loser gets
    /// `AlreadyRunning` without issuing any call.
    #[instrument(skip(self, cancel))]
    pub async fn refresh(
        &self,
        collection: Collection,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome> {
        let api = self.api.as_ref();
        match collection {
            Collection::Users => {
                let Some(_guard) = self.users.try_begin() else {
                    return Ok(RefreshOutcome::AlreadyRunning);
                };
                let fetched = fetch::fetch_users(api, cancel).await;
                self.users.commit(fetched).await
            }
            Collection::Channels => {
                let Some(_guard) = self.channels.try_begin() else {
                    return Ok(RefreshOutcome::AlreadyRunning);
                };
                let users = self.ready_users().await;
                let fetched = fetch::fetch_channels(api, users.as_deref(), cancel).await;
                self.channels.commit(fetched).await
            }
            Collection::Emoji => {
                let Some(_guard) = self.emoji.try_begin() else {
                    return Ok(RefreshOutcome::AlreadyRunning);
                };
                let fetched = fetch::fetch_emoji(api, cancel).await;
                self.emoji.commit(fetched).await
            }
        }
    }

    /// `refresh`, reporting the outcome through the log instead of the caller.
    pub async fn refresh_and_log(&self, collection: Collection, cancel: &CancellationToken) {
        match self.refresh(collection, cancel).await {
            Ok(RefreshOutcome::Refreshed { entries }) => {
                info!("{} directory refreshed: {} entries", collection, entries)
            }
            Ok(RefreshOutcome::AlreadyRunning) => {
                debug!("{} refresh already running, skipped", collection)
            }
            Err(ParleyError::Cancelled) => debug!("{} refresh cancelled", collection),
            Err(err) => warn!("{} directory refresh failed: {}", collection, err),
        }
    }

    /// Start background population. Users then channels run in one task so
    /// direct messages can be named by handle; emoji runs alongside.
    pub fn spawn_warmup(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let people = {
            let cache = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cache.refresh_and_log(Collection::Users, &cancel).await;
                cache.refresh_and_log(Collection::Channels, &cancel).await;
            })
        };
        let emoji = {
            let cache = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cache.refresh_and_log(Collection::Emoji, &cancel).await;
            })
        };
        vec![people, emoji]
    }

    /// Resolve a channel selector to its ID.
    ///
    /// IDs pass through without touching the cache. `#name` and `@handle`
    /// need the channels collection to be ready. `field` names the caller's
    /// parameter in validation errors.
    pub async fn resolve_channel(&self, field: &str, selector: &str) -> Result<String> {
        let selector = selector.trim();
        if looks_like_channel_id(selector) {
            return Ok(selector.to_string());
        }
        if !selector.starts_with('#') && !selector.starts_with('@') {
            return Err(ParleyError::validation(
                field,
                format!("`{}` is not a channel ID, #name or @handle", selector),
            ));
        }
        let channels = self
            .ready_channels()
            .await
            .ok_or_else(|| ParleyError::not_ready(Collection::Channels.as_str()))?;
        channels
            .by_selector(selector)
            .map(|c| c.id.clone())
            .ok_or_else(|| ParleyError::not_found(Collection::Channels.as_str(), selector))
    }

    /// Resolve a user selector (`U…` ID or `@handle`) to its ID.
    pub async fn resolve_user(&self, field: &str, selector: &str) -> Result<String> {
        let selector = selector.trim();
        if looks_like_user_id(selector) {
            return Ok(selector.to_string());
        }
        if !selector.starts_with('@') {
            return Err(ParleyError::validation(
                field,
                format!("`{}` is not a user ID or @handle", selector),
            ));
        }
        let users = self
            .ready_users()
            .await
            .ok_or_else(|| ParleyError::not_ready(Collection::Users.as_str()))?;
        users
            .by_handle(selector)
            .map(|u| u.id.clone())
            .ok_or_else(|| ParleyError::not_found(Collection::Users.as_str(), selector))
    }

    /// Resolve a selector within `collection`. Emoji resolve to the
    /// canonical name behind any alias.
    pub async fn resolve(&self, collection: Collection, selector: &str) -> Result<String> {
        match collection {
            Collection::Channels => self.resolve_channel("selector", selector).await,
            Collection::Users => self.resolve_user("selector", selector).await,
            Collection::Emoji => {
                let emoji = self
                    .emoji
                    .ready()
                    .await
                    .ok_or_else(|| ParleyError::not_ready(Collection::Emoji.as_str()))?;
                let name = selector.trim().trim_matches(':');
                emoji
                    .canonical(name)
                    .map(|e| e.name.clone())
                    .ok_or_else(|| ParleyError::not_found(Collection::Emoji.as_str(), selector))
            }
        }
    }
}
