//! SQLite-backed auxiliary store: structured document metadata for rich
//! queries, a TTL-bounded response cache, and a key/value configuration
//! table. Schema and pragma sequence are grounded on the original
//! embedded store this crate's design is descended from.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Default busy-timeout and cache TTL, matching the original store's
/// `SqliteConfig` defaults (`enable_wal = true`, `busy_timeout_ms = 5000`,
/// `cache_ttl = 1 hour`).
#[derive(Debug, Clone, Copy)]
pub struct SqliteConfig {
    pub busy_timeout_ms: u32,
    pub cache_ttl_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self { busy_timeout_ms: 5000, cache_ttl_secs: 3600 }
    }
}

/// A structured document metadata record, a superset of the flat
/// `Metadata` record kept for rich free-text queries.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub source: Option<String>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub custom_fields: Option<String>,
}

fn now_timestamp() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    secs.to_string()
}

pub struct SqliteStore {
    conn: Connection,
    config: SqliteConfig,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, config: SqliteConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, config)
    }

    pub fn open_in_memory(config: SqliteConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, config)
    }

    fn init(conn: Connection, config: SqliteConfig) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", config.busy_timeout_ms)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS document_metadata (
                id TEXT PRIMARY KEY, source TEXT, content_type TEXT, title TEXT,
                author TEXT, date TEXT, custom_fields TEXT,
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS query_cache (
                key TEXT PRIMARY KEY, value TEXT NOT NULL, timestamp TEXT NOT NULL,
                access_count INTEGER DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS configuration (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            CREATE INDEX IF NOT EXISTS idx_metadata_source ON document_metadata(source);
            CREATE INDEX IF NOT EXISTS idx_metadata_content_type ON document_metadata(content_type);
            CREATE INDEX IF NOT EXISTS idx_cache_timestamp ON query_cache(timestamp);",
        )?;
        Ok(Self { conn, config })
    }

    pub fn put_document(&self, record: &DocumentRecord) -> Result<()> {
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO document_metadata (id, source, content_type, title, author, date, custom_fields, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET
                source = excluded.source, content_type = excluded.content_type,
                title = excluded.title, author = excluded.author, date = excluded.date,
                custom_fields = excluded.custom_fields, updated_at = excluded.updated_at",
            params![
                record.id,
                record.source,
                record.content_type,
                record.title,
                record.author,
                record.date,
                record.custom_fields,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        self.conn
            .query_row(
                "SELECT id, source, content_type, title, author, date, custom_fields
                 FROM document_metadata WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DocumentRecord {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        content_type: row.get(2)?,
                        title: row.get(3)?,
                        author: row.get(4)?,
                        date: row.get(5)?,
                        custom_fields: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn delete_document(&self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM document_metadata WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn find_documents_by_source(&self, source: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM document_metadata WHERE source = ?1")?;
        let ids = stmt.query_map(params![source], |row| row.get(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn cache_put(&self, key: &str, value: &str) -> Result<()> {
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO query_cache (key, value, timestamp, access_count) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, timestamp = excluded.timestamp, access_count = 0",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn cache_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value, timestamp FROM query_cache WHERE key = ?1", params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        let Some((value, timestamp)) = value else {
            return Ok(None);
        };
        let age = now_timestamp().parse::<u64>().unwrap_or(0).saturating_sub(timestamp.parse::<u64>().unwrap_or(0));
        if age > self.config.cache_ttl_secs {
            self.conn.execute("DELETE FROM query_cache WHERE key = ?1", params![key])?;
            return Ok(None);
        }
        self.conn.execute("UPDATE query_cache SET access_count = access_count + 1 WHERE key = ?1", params![key])?;
        Ok(Some(value))
    }

    /// Remove all cache entries older than `cache_ttl_secs`. Returns the
    /// number of rows removed.
    pub fn evict_expired(&self) -> Result<usize> {
        let cutoff = now_timestamp().parse::<u64>().unwrap_or(0).saturating_sub(self.config.cache_ttl_secs);
        let removed = self.conn.execute("DELETE FROM query_cache WHERE CAST(timestamp AS INTEGER) < ?1", params![cutoff as i64])?;
        Ok(removed)
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO configuration (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.conn.query_row("SELECT value FROM configuration WHERE key = ?1", params![key], |row| row.get(0)).optional().map_err(Error::from)
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            source: Some("reuters".to_string()),
            content_type: Some("journal".to_string()),
            title: Some("title".to_string()),
            author: None,
            date: Some("2026-08-01".to_string()),
            custom_fields: None,
        }
    }

    #[test]
    fn put_then_get_document_roundtrips() {
        let store = SqliteStore::open_in_memory(SqliteConfig::default()).unwrap();
        store.put_document(&doc("a")).unwrap();
        let fetched = store.get_document("a").unwrap().unwrap();
        assert_eq!(fetched.source.as_deref(), Some("reuters"));
    }

    #[test]
    fn put_twice_upserts_instead_of_conflicting() {
        let store = SqliteStore::open_in_memory(SqliteConfig::default()).unwrap();
        store.put_document(&doc("a")).unwrap();
        let mut updated = doc("a");
        updated.title = Some("new title".to_string());
        store.put_document(&updated).unwrap();
        let fetched = store.get_document("a").unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("new title"));
    }

    #[test]
    fn delete_document_removes_it() {
        let store = SqliteStore::open_in_memory(SqliteConfig::default()).unwrap();
        store.put_document(&doc("a")).unwrap();
        store.delete_document("a").unwrap();
        assert!(store.get_document("a").unwrap().is_none());
    }

    #[test]
    fn find_by_source_returns_matching_ids() {
        let store = SqliteStore::open_in_memory(SqliteConfig::default()).unwrap();
        store.put_document(&doc("a")).unwrap();
        store.put_document(&doc("b")).unwrap();
        let mut other = doc("c");
        other.source = Some("bloomberg".to_string());
        store.put_document(&other).unwrap();
        let mut ids = store.find_documents_by_source("reuters").unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn cache_put_then_get_roundtrips() {
        let store = SqliteStore::open_in_memory(SqliteConfig::default()).unwrap();
        store.cache_put("q1", "result-json").unwrap();
        assert_eq!(store.cache_get("q1").unwrap().as_deref(), Some("result-json"));
    }

    #[test]
    fn cache_get_expired_entry_returns_none() {
        let store = SqliteStore::open_in_memory(SqliteConfig { busy_timeout_ms: 5000, cache_ttl_secs: 0 }).unwrap();
        store.cache_put("q1", "result-json").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(store.cache_get("q1").unwrap().is_none());
    }

    #[test]
    fn config_roundtrips() {
        let store = SqliteStore::open_in_memory(SqliteConfig::default()).unwrap();
        store.set_config("dimension", "768").unwrap();
        assert_eq!(store.get_config("dimension").unwrap().as_deref(), Some("768"));
    }
}
