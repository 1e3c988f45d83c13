//! SQLite subscription store.
//!
//! Persists records as JSON documents in a single `documents` table.
//!
//! # Usage
//! ```rust,no_run
//! use chainbridge_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./bridge.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use chainbridge_core::error::StoreError;
use chainbridge_core::store::SubscriptionStore;
use chainbridge_core::types::{store_key, SubscriptionRecord, STORE_KEY_PREFIX};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./bridge.db"`) or a full
    /// SQLite URL (`"sqlite:./bridge.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(backend)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. Data is lost when the store is
    /// dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every connection to `:memory:` is its own database, so keep one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                key        TEXT    PRIMARY KEY,
                body       TEXT    NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn load_all(&self) -> Result<Vec<SubscriptionRecord>, StoreError> {
        let rows = sqlx::query("SELECT key, body FROM documents WHERE key LIKE ? ORDER BY key")
            .bind(format!("{STORE_KEY_PREFIX}%"))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let records = rows
            .iter()
            .filter_map(|row| {
                let key: String = row.get("key");
                let body: String = row.get("body");
                match serde_json::from_str(&body) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(key = %key, error = %e, "skipping undecodable subscription document");
                        None
                    }
                }
            })
            .collect();
        Ok(records)
    }

    async fn save(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO documents (key, body, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(record.store_key())
        .bind(&body)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        debug!(subscription = %record.id, "subscription saved");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE key = ?")
            .bind(store_key(id))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE key = ?")
            .bind(store_key(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|r| {
            let body: String = r.get("body");
            serde_json::from_str(&body).map_err(StoreError::from)
        })
        .transpose()
    }
}
