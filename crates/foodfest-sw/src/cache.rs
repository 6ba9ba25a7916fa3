//! Named cache buckets.
//!
//! `CacheStorage` is the `caches` global: a set of named buckets, each
//! mapping a [`RequestKey`] to a captured [`Response`]. Buckets are matched
//! exactly by method and URL.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use foodfest_common::{FoodFestError, Result};
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::request::{Request, RequestKey, Response};

/// Storage for named cache buckets.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// All bucket names, oldest first.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Exact-match lookup in one bucket. A missing bucket is a miss.
    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>>;

    /// Store every entry or none of them. The bucket must be open.
    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()>;

    /// Number of entries in a bucket; zero if it does not exist.
    async fn entry_count(&self, name: &str) -> Result<usize>;

    /// Store a single entry.
    async fn put(&self, name: &str, request: Request, response: Response) -> Result<()> {
        self.put_all(name, vec![(request, response)]).await
    }
}

#[derive(Debug)]
struct Bucket {
    created: u64,
    entries: HashMap<RequestKey, Response>,
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
    next_created: AtomicU64,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        if !buckets.contains_key(name) {
            trace!(bucket = name, "creating bucket");
            let created = self.next_created.fetch_add(1, Ordering::Relaxed);
            buckets.insert(
                name.to_string(),
                Bucket {
                    created,
                    entries: HashMap::new(),
                },
            );
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let buckets = self.buckets.read().await;
        let mut names: Vec<(u64, &String)> =
            buckets.iter().map(|(name, b)| (b.created, name)).collect();
        names.sort_unstable();
        Ok(names.into_iter().map(|(_, name)| name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.write().await.remove(name).is_some())
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(name)
            .and_then(|bucket| bucket.entries.get(&request.key()))
            .cloned())
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .get_mut(name)
            .ok_or_else(|| FoodFestError::cache(format!("bucket '{name}' is not open")))?;

        for (request, response) in entries {
            bucket.entries.insert(request.key(), response);
        }
        Ok(())
    }

    async fn entry_count(&self, name: &str) -> Result<usize> {
        Ok(self
            .buckets
            .read()
            .await
            .get(name)
            .map_or(0, |bucket| bucket.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use url::Url;

    fn entry(url: &str, body: &'static str) -> (Request, Response) {
        let url = Url::parse(url).unwrap();
        (
            Request::get(url.clone()),
            Response::new(url, StatusCode::OK, body),
        )
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage = MemoryCacheStorage::new();
        storage.open("FoodFest-version_01").await.unwrap();
        let (req, resp) = entry("https://example.com/index.html", "<html>");
        storage.put("FoodFest-version_01", req, resp).await.unwrap();

        storage.open("FoodFest-version_01").await.unwrap();
        assert_eq!(storage.entry_count("FoodFest-version_01").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keys_in_creation_order() {
        let storage = MemoryCacheStorage::new();
        storage.open("b").await.unwrap();
        storage.open("a").await.unwrap();
        storage.open("c").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_put_requires_open_bucket() {
        let storage = MemoryCacheStorage::new();
        let (req, resp) = entry("https://example.com/index.html", "<html>");

        let result = storage.put("missing", req, resp).await;
        assert!(matches!(result, Err(FoodFestError::Cache { .. })));
        assert!(!storage.has("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_match_is_exact() {
        let storage = MemoryCacheStorage::new();
        storage.open("v1").await.unwrap();
        let (req, resp) = entry("https://example.com/index.html", "<html>");
        storage.put("v1", req.clone(), resp).await.unwrap();

        let hit = storage.match_request("v1", &req).await.unwrap();
        assert_eq!(hit.unwrap().body.as_ref(), b"<html>");

        let other = Request::get(Url::parse("https://example.com/index.html?x=1").unwrap());
        assert!(storage.match_request("v1", &other).await.unwrap().is_none());
        assert!(storage.match_request("v2", &req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = MemoryCacheStorage::new();
        storage.open("v1").await.unwrap();

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert_eq!(storage.entry_count("v1").await.unwrap(), 0);
    }
}
