//! Durable cache storage backed by SQLite.
//!
//! Buckets written here survive restarts, the way a browser keeps its
//! `caches` across sessions.

pub mod database;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foodfest_common::{FoodFestError, Result};
use foodfest_sw::{CacheStorage, Request, Response};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::database::db_error;

/// One row of `SqliteCacheStorage::summaries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
    pub name: String,
    pub entries: usize,
    pub created_at: Option<DateTime<Utc>>,
}

/// Cache storage persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStorage {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = database::init_database(path)?;
        info!(path = %path.display(), "cache database opened");
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(database::init_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| FoodFestError::cache("cache database lock poisoned"))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| FoodFestError::cache_with_source("cache database task failed", e))?
    }

    /// Every bucket with its entry count, oldest first.
    pub async fn summaries(&self) -> Result<Vec<BucketSummary>> {
        let rows = self.with_conn(|conn| database::bucket_stats(conn)).await?;
        Ok(rows
            .into_iter()
            .map(|(name, entries, created_ms)| BucketSummary {
                name,
                entries,
                created_at: DateTime::from_timestamp_millis(created_ms),
            })
            .collect())
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |conn| database::open_bucket(conn, &name))
            .await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_conn(move |conn| database::bucket_exists(conn, &name))
            .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| database::bucket_names(conn)).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let bucket = name.to_string();
        let removed = self
            .with_conn(move |conn| database::delete_bucket(conn, &bucket))
            .await?;
        if removed {
            debug!(bucket = name, "bucket deleted from database");
        }
        Ok(removed)
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        let name = name.to_string();
        let key = request.key();
        self.with_conn(move |conn| database::find_entry(conn, &name, &key))
            .await
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(db_error("failed to begin transaction"))?;
            database::insert_entries(&tx, &name, &entries)?;
            tx.commit().map_err(db_error("failed to commit entries"))
        })
        .await
    }

    async fn entry_count(&self, name: &str) -> Result<usize> {
        let name = name.to_string();
        self.with_conn(move |conn| database::entry_count(conn, &name))
            .await
    }
}
