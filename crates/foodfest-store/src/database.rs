use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use foodfest_common::{FoodFestError, Result};
use foodfest_sw::{Request, RequestKey, Response};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use url::Url;

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

pub(crate) fn db_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> FoodFestError {
    move |e| FoodFestError::cache_with_source(context, e)
}

/// Open (or create) the cache database at `path`
pub fn init_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| {
        FoodFestError::cache_with_source(format!("failed to open {}", path.display()), e)
    })?;
    prepare(conn)
}

/// Open a throwaway database that lives as long as the connection
pub fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(db_error("failed to open in-memory database"))?;
    prepare(conn)
}

fn prepare(conn: Connection) -> Result<Connection> {
    // Deleting a bucket cascades to its entries
    conn.execute("PRAGMA foreign_keys = ON", [])
        .map_err(db_error("failed to enable foreign keys"))?;

    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i32>(0).map(|count| count > 0),
        )
        .map_err(db_error("failed to inspect schema"))?;

    let version: i32 = if table_exists {
        conn.query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error("failed to read schema version"))?
        .unwrap_or(0)
    } else {
        0
    };

    if version < SCHEMA_VERSION {
        create_schema_v1(&conn)?;
    } else if version > SCHEMA_VERSION {
        return Err(FoodFestError::cache(format!(
            "cache database schema {version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(conn)
}

fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS buckets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            bucket_id INTEGER NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            response_url TEXT NOT NULL,
            status INTEGER NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (bucket_id, method, url)
        );
        "#,
    )
    .map_err(db_error("failed to create schema"))?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, Utc::now().timestamp()],
    )
    .map_err(db_error("failed to record schema version"))?;

    Ok(())
}

/// Create a bucket unless it exists
pub fn open_bucket(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().timestamp_millis()],
    )
    .map_err(db_error("failed to open bucket"))?;
    Ok(())
}

pub fn bucket_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(bucket_id(conn, name)?.is_some())
}

fn bucket_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row("SELECT id FROM buckets WHERE name = ?", [name], |row| {
        row.get(0)
    })
    .optional()
    .map_err(db_error("failed to look up bucket"))
}

/// Bucket names, oldest first
pub fn bucket_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM buckets ORDER BY id")
        .map_err(db_error("failed to list buckets"))?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(db_error("failed to list buckets"))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(db_error("failed to list buckets"))?;
    Ok(names)
}

/// Delete a bucket and its entries
pub fn delete_bucket(conn: &Connection, name: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM buckets WHERE name = ?", [name])
        .map_err(db_error("failed to delete bucket"))?;
    Ok(removed > 0)
}

/// Bucket name, entry count and creation time (ms since epoch), oldest first
pub fn bucket_stats(conn: &Connection) -> Result<Vec<(String, usize, i64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT b.name, COUNT(e.url), b.created_at
             FROM buckets b LEFT JOIN entries e ON e.bucket_id = b.id
             GROUP BY b.id ORDER BY b.id",
        )
        .map_err(db_error("failed to summarize buckets"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get::<_, i64>(1)? as usize, row.get(2)?))
        })
        .map_err(db_error("failed to summarize buckets"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_error("failed to summarize buckets"))?;
    Ok(rows)
}

pub fn entry_count(conn: &Connection, name: &str) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM entries e JOIN buckets b ON e.bucket_id = b.id WHERE b.name = ?",
            [name],
            |row| row.get(0),
        )
        .map_err(db_error("failed to count entries"))?;
    Ok(count as usize)
}

/// Write all entries in one transaction; the bucket must exist
pub fn insert_entries(tx: &Transaction<'_>, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let id = bucket_id(tx, name)?
        .ok_or_else(|| FoodFestError::cache(format!("bucket '{name}' is not open")))?;
    let now = Utc::now().timestamp_millis();

    let mut stmt = tx
        .prepare(
            "INSERT OR REPLACE INTO entries
             (bucket_id, method, url, response_url, status, headers, body, cached_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .map_err(db_error("failed to prepare insert"))?;

    for (request, response) in entries {
        let key = request.key();
        let headers = encode_headers(response)?;
        stmt.execute(params![
            id,
            key.method(),
            key.url(),
            response.url.as_str(),
            response.status.as_u16(),
            headers,
            response.body.as_ref(),
            now,
        ])
        .map_err(db_error("failed to store entry"))?;
    }
    Ok(())
}

/// Exact-match lookup
pub fn find_entry(conn: &Connection, name: &str, key: &RequestKey) -> Result<Option<Response>> {
    let row = conn
        .query_row(
            "SELECT e.response_url, e.status, e.headers, e.body
             FROM entries e JOIN buckets b ON e.bucket_id = b.id
             WHERE b.name = ? AND e.method = ? AND e.url = ?",
            params![name, key.method(), key.url()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u16>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            },
        )
        .optional()
        .map_err(db_error("failed to look up entry"))?;

    let Some((url, status, headers, body)) = row else {
        return Ok(None);
    };

    let url = Url::parse(&url)?;
    let headers = decode_headers(&headers)?;
    Response::from_parts(url, status, &headers, body).map(Some)
}

/// Header values are base64 so bytes outside UTF-8 survive the JSON column
fn encode_headers(response: &Response) -> Result<String> {
    let pairs: Vec<(String, String)> = response
        .header_pairs()
        .into_iter()
        .map(|(name, value)| (name, STANDARD.encode(value)))
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

fn decode_headers(json: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let pairs: Vec<(String, String)> = serde_json::from_str(json)?;
    pairs
        .into_iter()
        .map(|(name, value)| {
            let value = STANDARD.decode(value).map_err(|e| {
                FoodFestError::cache_with_source(format!("stored header {name} is corrupt"), e)
            })?;
            Ok((name, value))
        })
        .collect()
}
