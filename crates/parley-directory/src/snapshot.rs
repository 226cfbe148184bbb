//! On-disk snapshot files: one JSON array per collection.

use std::path::{Path, PathBuf};

use parley_auth_bridge::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Read a snapshot. A missing or unreadable file yields `None`.
pub async fn load<T: DeserializeOwned>(path: &Path) -> Option<Vec<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("no snapshot at {}", path.display());
            return None;
        }
        Err(err) => {
            warn!("failed to read snapshot {}: {}", path.display(), err);
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(entries) => Some(entries),
        Err(err) => {
            warn!("ignoring malformed snapshot {}: {}", path.display(), err);
            None
        }
    }
}

/// Write a snapshot atomically: serialize to a sibling temp file, then rename
/// it over the target so readers never observe a partial document.
pub async fn store<T: Serialize>(path: &Path, entries: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(entries)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &body).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    debug!("wrote {} entries to {}", entries.len(), path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "snapshot".into());
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CachedUser, ChannelKind, CachedChannel};
    use std::collections::{BTreeMap, HashSet};

    #[tokio::test]
    async fn test_round_trip_reproduces_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users_cache.json");
        let mut attributes = BTreeMap::new();
        attributes.insert("tz".to_string(), "Europe/Berlin".to_string());
        let users = vec![
            CachedUser {
                id: "U0123ABCD".to_string(),
                handle: "alice".to_string(),
                display_name: "Alice".to_string(),
                is_bot: false,
                is_deleted: false,
                attributes,
            },
            CachedUser {
                id: "B0123ABCD".to_string(),
                handle: "deploybot".to_string(),
                display_name: "Deploy Bot".to_string(),
                is_bot: true,
                is_deleted: false,
                attributes: BTreeMap::new(),
            },
        ];

        store(&path, &users).await.unwrap();
        let loaded: Vec<CachedUser> = load(&path).await.unwrap();

        let before: HashSet<_> = users.iter().map(|u| serde_json::to_string(u).unwrap()).collect();
        let after: HashSet<_> = loaded.iter().map(|u| serde_json::to_string(u).unwrap()).collect();
        assert_eq!(before, after);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_store_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels_cache.json");
        let channel = |id: &str| CachedChannel {
            id: id.to_string(),
            name: id.to_lowercase(),
            kind: ChannelKind::Public,
            member_count: 1,
            topic: String::new(),
            purpose: String::new(),
        };
        store(&path, &[channel("C0000AAAA"), channel("C0000BBBB")]).await.unwrap();
        store(&path, &[channel("C0000CCCC")]).await.unwrap();

        let loaded: Vec<CachedChannel> = load(&path).await.unwrap();
        assert_eq!(loaded, vec![channel("C0000CCCC")]);
    }

    #[tokio::test]
    async fn test_missing_or_malformed_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<Vec<CachedUser>> = load(&dir.path().join("nope.json")).await;
        assert!(missing.is_none());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, b"{not json").unwrap();
        let malformed: Option<Vec<CachedUser>> = load(&bad).await;
        assert!(malformed.is_none());
    }
}
