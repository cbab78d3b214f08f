//! Versioned document store — the optimistic-concurrency primitive
//!
//! Every profile, contest header, and contest participant lives under its own
//! key, so contention is scoped to duplicate submissions on a single key.
//! Writers read `(doc, version)`, compute the new document purely, then commit
//! with `compare_and_set`; a version mismatch means someone else committed
//! first and the caller re-reads.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::DbResult;

/// A stored document together with the version the read observed
#[derive(Debug, Clone)]
pub struct VersionedDoc {
    pub doc: String,
    pub version: i64,
}

#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Fetch a document, or `None` if the key has never been written.
    async fn get(&self, key: &str) -> DbResult<Option<VersionedDoc>>;

    /// Create a document at version 1. Returns false if the key already
    /// exists; the existing document is left untouched.
    async fn insert_if_absent(&self, key: &str, doc: &str) -> DbResult<bool>;

    /// Commit a new document only if the stored version still equals
    /// `expected_version`. Returns false on conflict.
    async fn compare_and_set(&self, key: &str, expected_version: i64, doc: &str)
        -> DbResult<bool>;

    /// All documents whose key starts with `prefix`, unordered.
    async fn list_prefix(&self, prefix: &str) -> DbResult<Vec<(String, VersionedDoc)>>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// Store backed by the `documents` table
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionedStore for SqliteStore {
    async fn get(&self, key: &str) -> DbResult<Option<VersionedDoc>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT doc, version FROM documents WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(doc, version)| VersionedDoc { doc, version }))
    }

    async fn insert_if_absent(&self, key: &str, doc: &str) -> DbResult<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO documents (key, doc, version) VALUES (?, ?, 1)")
                .bind(key)
                .bind(doc)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: i64,
        doc: &str,
    ) -> DbResult<bool> {
        // The version guard in the WHERE clause is what makes this a CAS:
        // a concurrent commit bumps the version and this UPDATE matches 0 rows.
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET doc = ?, version = version + 1, updated_at = strftime('%s', 'now')
            WHERE key = ? AND version = ?
            "#,
        )
        .bind(doc)
        .bind(key)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_prefix(&self, prefix: &str) -> DbResult<Vec<(String, VersionedDoc)>> {
        // Keys are code/user ids joined by ':' — no LIKE metacharacters
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT key, doc, version FROM documents WHERE key LIKE ?")
                .bind(format!("{prefix}%"))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(key, doc, version)| (key, VersionedDoc { doc, version }))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, the `simulate` command)
// ---------------------------------------------------------------------------

/// Map-backed store with the same semantics as [`SqliteStore`]
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, VersionedDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn get(&self, key: &str) -> DbResult<Option<VersionedDoc>> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn insert_if_absent(&self, key: &str, doc: &str) -> DbResult<bool> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(key) {
            return Ok(false);
        }
        docs.insert(
            key.to_string(),
            VersionedDoc {
                doc: doc.to_string(),
                version: 1,
            },
        );
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: i64,
        doc: &str,
    ) -> DbResult<bool> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(key) {
            Some(existing) if existing.version == expected_version => {
                existing.doc = doc.to_string();
                existing.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> DbResult<Vec<(String, VersionedDoc)>> {
        Ok(self
            .docs
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
