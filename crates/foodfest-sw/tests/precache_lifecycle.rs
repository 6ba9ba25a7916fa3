//! End-to-end lifecycle tests for the precache manager.
//!
//! A scripted network counts calls so cache-first behavior can be checked
//! without touching a real server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use foodfest_common::{FoodFestError, Result};
use foodfest_sw::{
    AssetManifest, CacheStorage, MemoryCacheStorage, Network, PrecacheConfig, PrecacheManager,
    Request, Response, ResponseSource, WorkerState,
};
use http::StatusCode;
use url::Url;

const SCOPE: &str = "https://user.github.io/foodfest/";

#[derive(Default)]
struct CountingNetwork {
    calls: AtomicUsize,
    offline: bool,
}

impl CountingNetwork {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for CountingNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(FoodFestError::network("offline"));
        }
        let status = if request.url.path().ends_with("missing.css") {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        };
        Ok(Response::new(
            request.url.clone(),
            status,
            format!("body of {}", request.url.path()),
        ))
    }
}

/// Memory storage whose deletes fail, as when the disk goes read-only.
#[derive(Default)]
struct ReadOnlyDeletes {
    inner: MemoryCacheStorage,
}

#[async_trait]
impl CacheStorage for ReadOnlyDeletes {
    async fn open(&self, name: &str) -> Result<()> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, _name: &str) -> Result<bool> {
        Err(FoodFestError::cache("disk is read-only"))
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        self.inner.match_request(name, request).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        self.inner.put_all(name, entries).await
    }

    async fn entry_count(&self, name: &str) -> Result<usize> {
        self.inner.entry_count(name).await
    }
}

fn scenario_config(version: &str) -> PrecacheConfig {
    PrecacheConfig::new(
        "FoodFest-",
        version,
        Url::parse(SCOPE).unwrap(),
        AssetManifest::new(["./index.html", "./app.bundle.js"]).unwrap(),
    )
    .unwrap()
}

fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

async fn active_manager(
    storage: Arc<MemoryCacheStorage>,
    network: Arc<CountingNetwork>,
) -> PrecacheManager {
    let (manager, _rx) =
        PrecacheManager::new(scenario_config("version_01"), storage, network).unwrap();
    manager.on_install().await.unwrap();
    manager.on_activate().await.unwrap();
    manager
}

#[tokio::test]
async fn test_install_caches_every_manifest_entry() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let (manager, _rx) = PrecacheManager::new(
        scenario_config("version_01"),
        storage.clone(),
        Arc::new(CountingNetwork::default()),
    )
    .unwrap();

    manager.on_install().await.unwrap();

    assert_eq!(manager.cache_name(), "FoodFest-version_01");
    assert_eq!(storage.entry_count("FoodFest-version_01").await.unwrap(), 2);
    for path in ["./index.html", "./app.bundle.js"] {
        let hit = storage
            .match_request("FoodFest-version_01", &Request::get(url(path)))
            .await
            .unwrap();
        assert!(hit.is_some(), "{path} missing after install");
    }
}

#[tokio::test]
async fn test_activation_deletes_stale_bucket() {
    let storage = Arc::new(MemoryCacheStorage::new());
    storage.open("FoodFest-version_00").await.unwrap();

    let (manager, _rx) = PrecacheManager::new(
        scenario_config("version_01"),
        storage.clone(),
        Arc::new(CountingNetwork::default()),
    )
    .unwrap();
    manager.on_install().await.unwrap();
    let deleted = manager.on_activate().await.unwrap();

    assert_eq!(deleted, vec!["FoodFest-version_00"]);
    assert_eq!(storage.keys().await.unwrap(), vec!["FoodFest-version_01"]);
    assert_eq!(storage.entry_count("FoodFest-version_01").await.unwrap(), 2);
}

#[tokio::test]
async fn test_activation_keeps_other_applications_buckets() {
    let storage = Arc::new(MemoryCacheStorage::new());
    storage.open("Weather-v7").await.unwrap();
    storage.open("FoodFest-version_00").await.unwrap();

    let manager = active_manager(storage.clone(), Arc::new(CountingNetwork::default())).await;

    assert_eq!(manager.state().await, WorkerState::Active);
    assert_eq!(
        storage.keys().await.unwrap(),
        vec!["Weather-v7", "FoodFest-version_01"]
    );
}

#[tokio::test]
async fn test_manifest_hit_skips_network() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = Arc::new(CountingNetwork::default());
    let manager = active_manager(storage, network.clone()).await;
    let calls_after_install = network.calls();

    let outcome = manager
        .on_fetch(&Request::get(url("./index.html")))
        .await
        .unwrap();

    assert_eq!(outcome.source, ResponseSource::Cache);
    assert_eq!(outcome.response.body.as_ref(), b"body of /foodfest/index.html");
    assert_eq!(network.calls(), calls_after_install);
}

#[tokio::test]
async fn test_miss_goes_to_network_without_caching() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = Arc::new(CountingNetwork::default());
    let manager = active_manager(storage.clone(), network.clone()).await;
    let calls_after_install = network.calls();

    let outcome = manager
        .on_fetch(&Request::get(url("./unknown.html")))
        .await
        .unwrap();

    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(network.calls(), calls_after_install + 1);
    assert_eq!(storage.entry_count("FoodFest-version_01").await.unwrap(), 2);
}

#[tokio::test]
async fn test_miss_while_offline_fails() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let manager = active_manager(storage.clone(), Arc::new(CountingNetwork::default())).await;

    // Same bucket, new worker instance with no connectivity.
    let offline = Arc::new(CountingNetwork {
        offline: true,
        ..Default::default()
    });
    drop(manager);
    let (manager, _rx) =
        PrecacheManager::restore(scenario_config("version_01"), storage, offline.clone())
            .await
            .unwrap();
    assert_eq!(manager.state().await, WorkerState::Active);

    let hit = manager.on_fetch(&Request::get(url("./app.bundle.js"))).await;
    assert!(hit.unwrap().from_cache());

    let miss = manager.on_fetch(&Request::get(url("./unknown.html"))).await;
    assert!(matches!(miss, Err(FoodFestError::Network { .. })));
}

#[tokio::test]
async fn test_reinstall_is_idempotent() {
    let storage = Arc::new(MemoryCacheStorage::new());
    for _ in 0..2 {
        let (manager, _rx) = PrecacheManager::new(
            scenario_config("version_01"),
            storage.clone(),
            Arc::new(CountingNetwork::default()),
        )
        .unwrap();
        manager.on_install().await.unwrap();
    }

    assert_eq!(storage.keys().await.unwrap(), vec!["FoodFest-version_01"]);
    assert_eq!(storage.entry_count("FoodFest-version_01").await.unwrap(), 2);
}

#[tokio::test]
async fn test_non_success_status_aborts_install() {
    let storage = Arc::new(MemoryCacheStorage::new());
    storage.open("FoodFest-version_00").await.unwrap();

    let config = scenario_config("version_01").with_manifest(
        AssetManifest::new(["./index.html", "./assets/css/missing.css"]).unwrap(),
    );
    let (manager, _rx) =
        PrecacheManager::new(config, storage.clone(), Arc::new(CountingNetwork::default()))
            .unwrap();

    let err = manager.on_install().await.unwrap_err();
    assert_eq!(err.category(), "install");
    assert_eq!(manager.state().await, WorkerState::Redundant);

    // The previous version keeps serving.
    assert_eq!(storage.keys().await.unwrap(), vec!["FoodFest-version_00"]);
}

#[tokio::test]
async fn test_version_bump_replaces_bucket() {
    let storage = Arc::new(MemoryCacheStorage::new());
    active_manager(storage.clone(), Arc::new(CountingNetwork::default())).await;

    let (next, _rx) = PrecacheManager::new(
        scenario_config("version_02"),
        storage.clone(),
        Arc::new(CountingNetwork::default()),
    )
    .unwrap();
    next.on_install().await.unwrap();
    next.skip_waiting().await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["FoodFest-version_02"]);
}

#[tokio::test]
async fn test_restore_without_complete_bucket_is_uninstalled() {
    let storage = Arc::new(MemoryCacheStorage::new());
    storage.open("FoodFest-version_01").await.unwrap();

    let (manager, _rx) = PrecacheManager::restore(
        scenario_config("version_01"),
        storage,
        Arc::new(CountingNetwork::default()),
    )
    .await
    .unwrap();

    assert_eq!(manager.state().await, WorkerState::Uninstalled);
}

#[tokio::test]
async fn test_restore_after_install_only_waits() {
    let storage = Arc::new(MemoryCacheStorage::new());
    storage.open("FoodFest-version_00").await.unwrap();

    let (installer, _rx) = PrecacheManager::new(
        scenario_config("version_01"),
        storage.clone(),
        Arc::new(CountingNetwork::default()),
    )
    .unwrap();
    installer.on_install().await.unwrap();
    drop(installer);

    let network = Arc::new(CountingNetwork::default());
    let (manager, _rx) =
        PrecacheManager::restore(scenario_config("version_01"), storage.clone(), network.clone())
            .await
            .unwrap();

    // Activation never ran: the old bucket is still here, so no takeover.
    assert_eq!(manager.state().await, WorkerState::Installed);
    assert_eq!(
        storage.keys().await.unwrap(),
        vec!["FoodFest-version_00", "FoodFest-version_01"]
    );
    let outcome = manager
        .on_fetch(&Request::get(url("./index.html")))
        .await
        .unwrap();
    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(network.calls(), 1);

    manager.on_activate().await.unwrap();
    assert_eq!(manager.state().await, WorkerState::Active);
    assert_eq!(storage.keys().await.unwrap(), vec!["FoodFest-version_01"]);
}

#[tokio::test]
async fn test_activation_failure_returns_to_installed() {
    let storage = Arc::new(ReadOnlyDeletes::default());
    storage.open("FoodFest-version_00").await.unwrap();

    let (manager, _rx) = PrecacheManager::new(
        scenario_config("version_01"),
        storage.clone(),
        Arc::new(CountingNetwork::default()),
    )
    .unwrap();
    manager.on_install().await.unwrap();

    let err = manager.on_activate().await.unwrap_err();
    assert!(
        matches!(err, FoodFestError::Activation { ref bucket, .. } if bucket == "FoodFest-version_00")
    );
    assert_eq!(err.category(), "activation");
    assert_eq!(manager.state().await, WorkerState::Installed);

    // Nothing was removed and the new bucket is intact for a retry.
    assert_eq!(
        storage.keys().await.unwrap(),
        vec!["FoodFest-version_00", "FoodFest-version_01"]
    );
    assert_eq!(storage.entry_count("FoodFest-version_01").await.unwrap(), 2);
    assert!(matches!(
        manager.on_activate().await,
        Err(FoodFestError::Activation { .. })
    ));
    assert_eq!(manager.state().await, WorkerState::Installed);
}
