//! Workspace directory cache.
//!
//! Users, channels and emoji are fetched in full through a `WorkspaceApi`,
//! indexed for name⇄ID lookup, and mirrored to one JSON snapshot per
//! collection so a restart is immediately useful.

pub mod cache;
pub mod fetch;
pub mod index;
pub mod schema;
pub mod snapshot;

pub use cache::{MetadataCache, RefreshOutcome, SnapshotPaths};
pub use index::{
    looks_like_channel_id, looks_like_user_id, ChannelsDirectory, Directory, EmojiDirectory,
    UsersDirectory,
};
pub use schema::{
    CachedChannel, CachedEmoji, CachedUser, ChannelKind, Collection, DirectorySource,
    DirectoryState,
};
