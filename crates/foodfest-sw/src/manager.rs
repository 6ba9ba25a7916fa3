//! The precache manager: install, activate and fetch handling.

use std::collections::HashSet;
use std::sync::Arc;

use foodfest_common::{FoodFestError, Result};
use futures::future::try_join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::PrecacheConfig;
use crate::lifecycle::WorkerState;
use crate::network::Network;
use crate::request::{Request, Response};

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

/// Result of fetch interception.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchOutcome {
    pub fn from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// Summary of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub assets: usize,
    pub bytes: u64,
}

/// Progress notifications for the host.
#[derive(Debug, Clone)]
pub enum PrecacheEvent {
    /// The worker moved between lifecycle states.
    StateChange {
        cache_name: String,
        from: WorkerState,
        to: WorkerState,
    },
    /// A manifest asset was committed to the bucket.
    AssetCached { cache_name: String, url: Url },
    /// A stale bucket was deleted during activation.
    BucketDeleted { name: String },
}

/// Buckets that survive activation.
///
/// The current bucket is kept by exact name. Buckets that do not carry the
/// application prefix belong to someone else on the same origin and are kept
/// too. Every other bucket is stale.
pub fn compute_keeplist(names: &[String], app_prefix: &str, current: &str) -> HashSet<String> {
    let mut keeplist: HashSet<String> = names
        .iter()
        .filter(|name| !name.starts_with(app_prefix))
        .cloned()
        .collect();
    keeplist.insert(current.to_string());
    keeplist
}

/// Buckets in `storage` that activation would delete, oldest first.
async fn stale_buckets(
    storage: &dyn CacheStorage,
    app_prefix: &str,
    current: &str,
) -> Result<Vec<String>> {
    let names = storage.keys().await?;
    let keeplist = compute_keeplist(&names, app_prefix, current);
    Ok(names
        .into_iter()
        .filter(|name| !keeplist.contains(name))
        .collect())
}

/// Owns one cache bucket and mediates fetches through it.
pub struct PrecacheManager {
    config: PrecacheConfig,
    cache_name: String,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    state: RwLock<WorkerState>,
    event_tx: mpsc::UnboundedSender<PrecacheEvent>,
}

impl PrecacheManager {
    /// Create an uninstalled worker.
    ///
    /// Fails if the configuration does not validate, since an empty prefix
    /// would make every bucket on the origin look stale.
    pub fn new(
        config: PrecacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PrecacheEvent>)> {
        config.validate()?;
        Ok(Self::with_state(config, storage, network, WorkerState::Uninstalled))
    }

    /// Recreate a worker after a host restart.
    ///
    /// A worker whose bucket is incomplete starts `Uninstalled`. A complete
    /// bucket with stale application buckets still beside it means
    /// activation never ran, so the worker waits as `Installed`. Only a
    /// complete bucket with nothing left to prune starts `Active`.
    pub async fn restore(
        config: PrecacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PrecacheEvent>)> {
        config.validate()?;
        let cache_name = config.cache_name();

        let mut complete = storage.has(&cache_name).await?;
        if complete {
            for (_, url) in config.manifest.resolve(&config.scope)? {
                if storage
                    .match_request(&cache_name, &Request::get(url))
                    .await?
                    .is_none()
                {
                    complete = false;
                    break;
                }
            }
        }

        let state = if !complete {
            WorkerState::Uninstalled
        } else if stale_buckets(storage.as_ref(), &config.app_prefix, &cache_name)
            .await?
            .is_empty()
        {
            WorkerState::Active
        } else {
            WorkerState::Installed
        };
        debug!(cache = %cache_name, %state, "restored worker");

        Ok(Self::with_state(config, storage, network, state))
    }

    fn with_state(
        config: PrecacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        state: WorkerState,
    ) -> (Self, mpsc::UnboundedReceiver<PrecacheEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cache_name = config.cache_name();

        (
            Self {
                config,
                cache_name,
                storage,
                network,
                state: RwLock::new(state),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn config(&self) -> &PrecacheConfig {
        &self.config
    }

    /// Name of the current bucket.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Whether `url` falls under the worker scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        let scope = &self.config.scope;
        url.origin() == scope.origin() && url.path().starts_with(scope.path())
    }

    async fn transition(&self, next: WorkerState) -> Result<()> {
        let mut state = self.state.write().await;
        let current = *state;
        if !current.can_transition_to(next) {
            return Err(FoodFestError::state(format!(
                "cannot move from {current} to {next}"
            )));
        }
        *state = next;
        drop(state);

        trace!(cache = %self.cache_name, from = %current, to = %next, "state change");
        self.emit(PrecacheEvent::StateChange {
            cache_name: self.cache_name.clone(),
            from: current,
            to: next,
        });
        Ok(())
    }

    fn emit(&self, event: PrecacheEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }

    /// Install: precache every manifest entry.
    ///
    /// Resolves once all entries are stored. Any failed fetch aborts the
    /// install, the worker becomes redundant and the bucket is not touched.
    pub async fn on_install(&self) -> Result<InstallReport> {
        self.transition(WorkerState::Installing).await?;
        info!(cache = %self.cache_name, assets = self.config.manifest.len(), "installing cache");

        match self.precache().await {
            Ok(report) => {
                self.transition(WorkerState::Installed).await?;
                info!(
                    cache = %report.cache_name,
                    assets = report.assets,
                    bytes = report.bytes,
                    "install complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!(cache = %self.cache_name, category = e.category(), error = %e, "install failed");
                self.transition(WorkerState::Redundant).await?;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<InstallReport> {
        let targets = self.config.manifest.resolve(&self.config.scope)?;

        let fetches = targets.into_iter().map(|(path, url)| async move {
            let request = Request::get(url);
            let response = self
                .network
                .fetch(&request)
                .await
                .map_err(|e| FoodFestError::install(path.as_str(), e))?;

            if !response.ok() {
                return Err(FoodFestError::install(
                    path.as_str(),
                    FoodFestError::network(format!(
                        "{} returned {}",
                        request.url, response.status
                    )),
                ));
            }
            trace!(asset = %path, status = %response.status, "asset fetched");
            Ok((request, response))
        });
        let entries = try_join_all(fetches).await?;

        let assets = entries.len();
        let bytes = entries.iter().map(|(_, r)| r.body.len() as u64).sum();
        let urls: Vec<Url> = entries.iter().map(|(req, _)| req.url.clone()).collect();

        // Nothing is written until every asset is in hand.
        self.storage.open(&self.cache_name).await?;
        self.storage.put_all(&self.cache_name, entries).await?;

        for url in urls {
            self.emit(PrecacheEvent::AssetCached {
                cache_name: self.cache_name.clone(),
                url,
            });
        }

        Ok(InstallReport {
            cache_name: self.cache_name.clone(),
            assets,
            bytes,
        })
    }

    /// Activate: delete every stale bucket of this application.
    ///
    /// Returns the deleted bucket names. On failure the worker stays
    /// installed so activation can run again.
    pub async fn on_activate(&self) -> Result<Vec<String>> {
        self.transition(WorkerState::Activating).await?;

        match self.prune_stale_buckets().await {
            Ok(deleted) => {
                self.transition(WorkerState::Active).await?;
                info!(cache = %self.cache_name, deleted = deleted.len(), "worker active");
                Ok(deleted)
            }
            Err(e) => {
                error!(cache = %self.cache_name, error = %e, "activation failed");
                self.transition(WorkerState::Installed).await?;
                Err(e)
            }
        }
    }

    /// Forced takeover of an installed worker.
    pub async fn skip_waiting(&self) -> Result<Vec<String>> {
        let state = self.state().await;
        if state != WorkerState::Installed {
            return Err(FoodFestError::state(format!(
                "skip_waiting needs an installed worker, found {state}"
            )));
        }
        debug!(cache = %self.cache_name, "skipping wait");
        self.on_activate().await
    }

    async fn prune_stale_buckets(&self) -> Result<Vec<String>> {
        let stale = stale_buckets(self.storage.as_ref(), &self.config.app_prefix, &self.cache_name)
            .await
            .map_err(|e| FoodFestError::activation(self.cache_name.as_str(), e))?;

        try_join_all(stale.iter().map(|name| async move {
            info!(bucket = %name, "deleting cache");
            self.storage
                .delete(name)
                .await
                .map_err(|e| FoodFestError::activation(name.as_str(), e))
        }))
        .await?;

        for name in &stale {
            self.emit(PrecacheEvent::BucketDeleted { name: name.clone() });
        }
        Ok(stale)
    }

    /// Fetch interception: cache first, network on a miss.
    ///
    /// Misses are not written back. Requests outside the scope, or made
    /// while the worker is not active, go straight to the network.
    pub async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
        let state = self.state().await;
        if !state.controls_fetches() || !self.in_scope(&request.url) {
            trace!(url = %request.url, %state, "not intercepted");
            let response = self.network.fetch(request).await?;
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Network,
            });
        }

        if let Some(response) = self
            .storage
            .match_request(&self.cache_name, request)
            .await?
        {
            debug!(url = %request.url, "cache hit");
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Cache,
            });
        }

        debug!(url = %request.url, "cache miss, forwarding to network");
        let response = self.network.fetch(request).await.map_err(|e| {
            warn!(url = %request.url, error = %e, "network fetch failed on cache miss");
            e
        })?;

        Ok(FetchOutcome {
            response,
            source: ResponseSource::Network,
        })
    }
}
