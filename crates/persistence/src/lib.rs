//! Persistence layer for Trade Arena
//!
//! SQLite storage behind two surfaces: a versioned document store
//! (profiles, contests) and an append-only trade log.

pub mod repository;
pub mod schema;
pub mod store;

pub use sqlx::sqlite::SqlitePool;
pub use store::{MemoryStore, SqliteStore, VersionedDoc, VersionedStore};

use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.apply_schema().await?;
        debug!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.apply_schema().await?;
        Ok(db)
    }

    /// Execute the DDL statements one at a time, then set pragmas.
    async fn apply_schema(&self) -> DbResult<()> {
        for statement in schema::CREATE_TABLES.split(';') {
            let sql: String = statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            let sql = sql.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(format!("{e}: {sql}")))?;
        }

        // WAL keeps readers unblocked while a settlement commits
        for pragma in schema::PRAGMAS {
            sqlx::query(pragma)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("{pragma} failed: {e}")))?;
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Clone the pool for use in spawned tasks
    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}
