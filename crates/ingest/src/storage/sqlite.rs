//! SQLite-backed document store

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use serde_json::Value;

use super::merge::Fields;
use super::path::{CollectionPath, DocPath};
use super::traits::SyncStore;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: document table
        M::up(
            r#"
            CREATE TABLE documents (
                path TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                data TEXT NOT NULL CHECK (json_valid(data)),
                updated_at TEXT NOT NULL
            );

            CREATE INDEX idx_documents_collection ON documents(collection);
            "#,
        ),
    ])
}

/// SQLite-based document store
///
/// Every document is one row keyed by its full path. A merge is a single
/// upsert statement applying `json_patch`, so the write never depends on a
/// prior read and concurrent writers to the same row cannot lose fields.
pub struct SqliteSyncStore {
    conn: Mutex<Connection>,
}

impl SqliteSyncStore {
    /// Open (or create) a store at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn, true)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, false)
    }

    fn from_connection(mut conn: Connection, on_disk: bool) -> Result<Self> {
        // WAL lets UI readers query jobs while a sync is writing
        if on_disk {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                "#,
            )?;
        }
        conn.execute_batch(
            r#"
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))
    }

    /// Total number of stored documents
    pub fn count_documents(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn get_document(&self, path: &DocPath) -> Result<Option<Value>> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE path = ?1",
                params![path.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read {}", path))?;

        data.map(|d| serde_json::from_str(&d).with_context(|| format!("Corrupt document at {}", path)))
            .transpose()
    }

    async fn merge_document(&self, path: &DocPath, fields: Fields) -> Result<()> {
        let patch = serde_json::to_string(&Value::Object(fields))?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO documents (path, collection, data, updated_at)
            VALUES (?1, ?2, json_patch('{}', ?3), ?4)
            ON CONFLICT(path) DO UPDATE SET
                data = json_patch(documents.data, ?3),
                updated_at = ?4
            "#,
            params![path.as_str(), path.collection(), patch, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to merge {}", path))?;
        Ok(())
    }

    async fn list_documents(&self, collection: &CollectionPath) -> Result<Vec<(DocPath, Value)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path, data FROM documents WHERE collection = ?1 ORDER BY path")?;
        let rows = stmt.query_map(params![collection.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (path, data) = row?;
            let value = serde_json::from_str(&data)
                .with_context(|| format!("Corrupt document at {}", path))?;
            result.push((DocPath::from_raw(path), value));
        }
        Ok(result)
    }
}
