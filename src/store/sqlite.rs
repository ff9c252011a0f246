//! SQLite-backed document store.
//!
//! One `documents` table keyed by (collection, id); bodies are JSON text.
//! The connection is opened eagerly at startup so an unreachable database
//! fails the process fast, and re-opened transparently if an operation runs
//! after `shutdown`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, WeaverError};

use super::{fields_match, merge_patch, DocumentStore};

pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Opens the store, establishing the connection immediately.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            conn: Mutex::new(None),
        };
        store.with_conn(|_| Ok(()))?;
        Ok(store)
    }

    /// Drops the connection. Later operations reconnect lazily.
    pub fn shutdown(&self) {
        let mut guard = self.conn.lock().unwrap();
        if guard.take().is_some() {
            debug!(path = %self.path.display(), "closed document store connection");
        }
    }

    fn with_conn<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap();
        if guard.is_none() {
            *guard = Some(Self::connect(&self.path)?);
        }
        op(guard.as_mut().unwrap())
    }

    fn connect(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                body       TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            "#,
        )?;
        debug!(path = %path.display(), "opened document store");
        Ok(conn)
    }

    fn read_one(conn: &Connection, collection: &str, id: &str) -> Result<Option<Value>> {
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<String> {
        self.with_conn(|conn| {
            let body = serde_json::to_string(&document)?;
            match conn.execute(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
                params![collection, id, body],
            ) {
                Ok(_) => Ok(id.to_string()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(WeaverError::Duplicated(format!("{collection}/{id}")))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.with_conn(|conn| Self::read_one(conn, collection, id))
    }

    async fn get_many(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
            let mut documents = Vec::new();
            for body in rows {
                let document: Value = serde_json::from_str(&body?)?;
                if fields_match(&document, filter) {
                    documents.push(document);
                }
            }
            Ok(documents)
        })
    }

    async fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<Option<Value>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(mut document) = Self::read_one(&tx, collection, id)? else {
                return Ok(None);
            };
            merge_patch(&mut document, patch);
            tx.execute(
                "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
                params![collection, id, serde_json::to_string(&document)?],
            )?;
            tx.commit()?;
            Ok(Some(document))
        })
    }

    async fn update_guarded(
        &self,
        collection: &str,
        id: &str,
        guard: &Value,
        patch: &Value,
    ) -> Result<Option<Value>> {
        self.with_conn(|conn| {
            // The read and the conditional write share one transaction, so
            // no other writer can slip between the guard check and the patch.
            let tx = conn.transaction()?;
            let Some(mut document) = Self::read_one(&tx, collection, id)? else {
                return Ok(None);
            };
            if !fields_match(&document, guard) {
                return Ok(None);
            }
            merge_patch(&mut document, patch);
            tx.execute(
                "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
                params![collection, id, serde_json::to_string(&document)?],
            )?;
            tx.commit()?;
            Ok(Some(document))
        })
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            Ok(removed > 0)
        })
    }
}
