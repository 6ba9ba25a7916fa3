//! Wires configuration, storage and network into a precache worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use foodfest_common::{FoodFestError, Result};
use foodfest_store::{BucketSummary, SqliteCacheStorage};
use foodfest_sw::{
    FetchOutcome, HttpConfig, HttpNetwork, InstallReport, Network, PrecacheConfig, PrecacheEvent,
    PrecacheManager, Request, SiteDirectory, WorkerState,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

/// Effective settings for one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ShellConfig {
    pub precache: PrecacheConfig,
    /// SQLite file holding the buckets.
    pub database: PathBuf,
    /// Serve from this build directory instead of over HTTP.
    pub site: Option<PathBuf>,
}

impl ShellConfig {
    /// Merge the optional config file with command-line overrides.
    pub fn resolve(
        config_path: Option<&Path>,
        database: Option<PathBuf>,
        site: Option<PathBuf>,
    ) -> Result<Self> {
        let precache = match config_path {
            Some(path) => PrecacheConfig::load(path)?,
            None => PrecacheConfig::default(),
        };

        Ok(Self {
            precache,
            database: database.unwrap_or_else(Self::default_database),
            site,
        })
    }

    pub fn default_database() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("foodfest")
            .join("cache.sqlite")
    }
}

/// A host for the precache worker backed by on-disk storage.
pub struct Shell {
    config: ShellConfig,
    storage: Arc<SqliteCacheStorage>,
    network: Arc<dyn Network>,
}

impl Shell {
    pub fn open(config: ShellConfig) -> Result<Self> {
        let storage = Arc::new(SqliteCacheStorage::open(&config.database)?);

        let network: Arc<dyn Network> = match config.site {
            Some(ref root) => {
                if !root.is_dir() {
                    return Err(FoodFestError::config(format!(
                        "site directory {} does not exist",
                        root.display()
                    )));
                }
                info!(root = %root.display(), "serving from build directory");
                Arc::new(SiteDirectory::new(root, config.precache.scope.clone()))
            }
            None => Arc::new(HttpNetwork::new(HttpConfig::default())?),
        };

        Ok(Self {
            config,
            storage,
            network,
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    fn fresh_worker(&self) -> Result<(PrecacheManager, mpsc::UnboundedReceiver<PrecacheEvent>)> {
        PrecacheManager::new(
            self.config.precache.clone(),
            self.storage.clone(),
            self.network.clone(),
        )
    }

    async fn restored_worker(
        &self,
    ) -> Result<(PrecacheManager, mpsc::UnboundedReceiver<PrecacheEvent>)> {
        PrecacheManager::restore(
            self.config.precache.clone(),
            self.storage.clone(),
            self.network.clone(),
        )
        .await
    }

    /// Run the install phase only.
    pub async fn install(&self) -> Result<InstallReport> {
        let (manager, mut rx) = self.fresh_worker()?;
        let result = manager.on_install().await;
        log_events(&mut rx);
        result
    }

    /// Activate a worker installed by an earlier run. Returns the deleted
    /// buckets; an already active worker has nothing to delete.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let (manager, mut rx) = self.restored_worker().await?;
        if manager.state().await == WorkerState::Active {
            return Ok(Vec::new());
        }
        let result = manager.on_activate().await;
        log_events(&mut rx);
        result
    }

    /// Install, then take over immediately. Returns the deleted buckets.
    pub async fn update(&self) -> Result<(InstallReport, Vec<String>)> {
        let (manager, mut rx) = self.fresh_worker()?;
        let result = match manager.on_install().await {
            Ok(report) => manager.skip_waiting().await.map(|deleted| (report, deleted)),
            Err(e) => Err(e),
        };
        log_events(&mut rx);
        result
    }

    /// Run fetch interception against the restored worker.
    pub async fn fetch(&self, target: &str) -> Result<FetchOutcome> {
        let url = self.resolve_target(target)?;
        let (manager, _rx) = self.restored_worker().await?;

        debug!(url = %url, state = %manager.state().await, "fetching");
        manager.on_fetch(&Request::get(url)).await
    }

    pub async fn buckets(&self) -> Result<Vec<BucketSummary>> {
        self.storage.summaries().await
    }

    /// Accept either a full URL or a path relative to the scope.
    pub fn resolve_target(&self, target: &str) -> Result<Url> {
        match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(self.config.precache.scope.join(target)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Log whatever the worker emitted. Events are queued synchronously, so
/// everything is in the channel once the operation returns.
fn log_events(rx: &mut mpsc::UnboundedReceiver<PrecacheEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            PrecacheEvent::StateChange { cache_name, from, to } => {
                debug!(cache = %cache_name, %from, %to, "worker state changed");
            }
            PrecacheEvent::AssetCached { cache_name, url } => {
                debug!(cache = %cache_name, url = %url, "asset cached");
            }
            PrecacheEvent::BucketDeleted { name } => {
                debug!(bucket = %name, "bucket deleted");
            }
        }
    }
}
