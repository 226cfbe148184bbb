use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_auth_bridge::{AuthRouter, WorkspaceApi};
use parley_directory::MetadataCache;
use tracing::info;

pub mod config;
pub mod cursor;
pub mod engine;
pub mod fields;
pub mod listing;
pub mod render;
pub mod scheduler;
pub mod search;
pub mod text;
pub mod window;

pub use config::{CacheSettings, ParleyConfig, QuerySettings};
pub use engine::{ConversationQuery, MessageRecord, Page, QueryEngine};
pub use fields::{Field, FieldSet, DEFAULT_FIELDS};
pub use listing::{ChannelListQuery, ChannelSort};
pub use render::Table;
pub use scheduler::DirectoryScheduler;
pub use search::{SearchFilters, SearchPage, SearchQuery, SortMode};
pub use window::{TimeBounds, WindowSpec};

pub use parley_auth_bridge::{ParleyError, Result as ParleyResult};

#[derive(Debug, Clone)]
pub struct ParleyPaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
}

impl ParleyPaths {
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os("PARLEY_DATA_DIR") {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(home) = std::env::var_os("HOME") {
            return Self::from_base(PathBuf::from(home).join(".parley"));
        }
        Self::from_base(PathBuf::from(".parley"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let config_path = base_dir.join("parley.toml");
        let socket_path = base_dir.join("parley.sock");
        Self {
            base_dir,
            config_path,
            socket_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create data dir: {}", self.base_dir.display()))?;
        Ok(())
    }
}

/// Everything a running process shares: router, directory cache and engine.
#[derive(Clone)]
pub struct Core {
    pub config: ParleyConfig,
    pub router: Arc<AuthRouter>,
    pub cache: Arc<MetadataCache>,
    pub engine: Arc<QueryEngine>,
}

impl Core {
    /// Build the credential and router (fatal on configuration errors) and
    /// load directory snapshots. No network traffic happens here.
    pub async fn init(paths: &ParleyPaths, config: ParleyConfig) -> Result<Self> {
        info!("Initializing parley core...");
        paths.ensure_dirs()?;
        config.query.validate()?;

        let router = Arc::new(
            AuthRouter::from_settings(&config.auth, &config.network)
                .context("Failed to set up upstream credentials")?,
        );
        let api: Arc<dyn WorkspaceApi> = router.clone();
        let snapshots = config.cache.snapshot_paths(&paths.base_dir);
        let cache = Arc::new(MetadataCache::load(api.clone(), snapshots).await);
        let engine = Arc::new(QueryEngine::new(api, cache.clone(), config.query.clone()));

        Ok(Self {
            config,
            router,
            cache,
            engine,
        })
    }
}
