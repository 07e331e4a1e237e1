//! SQLite-backed shared tier.
//!
//! One row per cache key holding the JSON entry and its absolute expiry.
//! Any process opening the same file shares the tier; WAL keeps readers
//! from blocking the writer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::entry::CacheEntry;
use crate::key::CacheKey;
use crate::shared::SharedTier;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS result_cache (
        cache_key     TEXT PRIMARY KEY,
        index_version INTEGER NOT NULL,
        payload       TEXT NOT NULL,
        created_at_ms INTEGER NOT NULL,
        expires_at_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_result_cache_expiry ON result_cache(expires_at_ms);
";

pub struct SqliteTier {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTier {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        info!(path = %path.display(), "shared result cache opened");
        Self::init(conn)
    }

    /// Private to this process; mostly useful in tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Deletes expired rows, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let conn = Arc::clone(&self.conn);
        let removed = tokio::task::spawn_blocking(move || {
            conn.lock().execute(
                "DELETE FROM result_cache WHERE expires_at_ms <= ?1",
                params![Utc::now().timestamp_millis()],
            )
        })
        .await??;
        debug!(removed, "purged expired result cache rows");
        Ok(removed)
    }

    pub async fn len(&self) -> Result<usize> {
        let conn = Arc::clone(&self.conn);
        let count: i64 = tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row("SELECT COUNT(*) FROM result_cache", [], |row| row.get(0))
        })
        .await??;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl SharedTier for SqliteTier {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>> {
        let conn = Arc::clone(&self.conn);
        let digest = key.digest.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = conn.lock();
            let now = Utc::now().timestamp_millis();
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT payload, expires_at_ms FROM result_cache WHERE cache_key = ?1",
                    params![digest],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((_, expires_at)) if expires_at <= now => {
                    conn.execute("DELETE FROM result_cache WHERE cache_key = ?1", params![digest])?;
                    Ok(None)
                }
                Some((payload, _)) => Ok(Some(payload)),
                None => Ok(None),
            }
        })
        .await??;
        row.map(|payload| {
            CacheEntry::from_json(&payload)
                .map(Arc::new)
                .context("decoding cached result")
        })
        .transpose()
    }

    async fn put(&self, entry: Arc<CacheEntry>) -> Result<()> {
        let payload = entry.to_json().context("encoding cached result")?;
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let version = i64::try_from(entry.key.index_version.get()).unwrap_or(i64::MAX);
            conn.lock().execute(
                "INSERT OR REPLACE INTO result_cache
                    (cache_key, index_version, payload, created_at_ms, expires_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.key.digest,
                    version,
                    payload,
                    entry.created_at.timestamp_millis(),
                    entry.expires_at_ms(),
                ],
            )
        })
        .await??;
        Ok(())
    }
}
