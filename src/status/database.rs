//! SQLite-backed status store.
//!
//! This module provides:
//! - Connection pool management
//! - WAL mode for concurrent status writers
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use docfetch_core::status::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("documents.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::{StatusError, StatusSink};
use crate::document::{DocumentRecord, DocumentStatus, StorageLocator};

/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connections wait this long before returning `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to or query the database.
    #[error("database error: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Database connection wrapper with connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`, enables WAL,
    /// and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts `PENDING` rows for documents not yet known to the store.
    ///
    /// Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the transaction fails.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub async fn register_documents(&self, documents: &[DocumentRecord]) -> Result<u64, DbError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for doc in documents {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO documents \
                 (id, title, url, country, major_type, language, year) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&doc.title)
            .bind(&doc.source_url)
            .bind(doc.country.as_deref())
            .bind(doc.major_type.as_deref())
            .bind(doc.language.as_deref())
            .bind(doc.year.as_deref())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        info!(inserted, "documents registered");
        Ok(inserted)
    }

    /// Returns the stored status token and location for a document.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    pub async fn document_status(
        &self,
        document_id: &str,
    ) -> Result<Option<(String, Option<String>)>, DbError> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT document_status, document_location FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Status sink issuing `UPDATE documents` statements.
#[derive(Debug, Clone)]
pub struct DatabaseStatusSink {
    db: Database,
}

impl DatabaseStatusSink {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatusSink for DatabaseStatusSink {
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        locator: Option<&StorageLocator>,
    ) -> Result<(), StatusError> {
        let result = sqlx::query(
            "UPDATE documents \
             SET document_status = ?, \
                 document_location = COALESCE(?, document_location), \
                 updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(locator.map(StorageLocator::as_str))
        .bind(document_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StatusError::UnknownDocument(document_id.to_string()));
        }
        debug!(document_id, %status, "status row updated");
        Ok(())
    }
}
