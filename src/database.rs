// Database layer for the escrow client

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::info;

use crate::error::StoreError;

pub type DbPool = Pool<Sqlite>;

pub struct Database;

impl Database {
    /// Initialize database connection pool
    pub async fn init(database_url: &str) -> Result<DbPool> {
        info!("Opening database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        // Run migrations
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(pool)
    }

    pub async fn get_item(pool: &DbPool, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM local_storage WHERE key = ?1")
            .bind(key)
            .fetch_optional(pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set_item(pool: &DbPool, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO local_storage (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn remove_item(pool: &DbPool, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM local_storage WHERE key = ?1")
            .bind(key)
            .execute(pool)
            .await?;

        Ok(())
    }
}

/// Single-connection in-memory database with migrations applied
#[cfg(test)]
pub(crate) async fn memory_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_overwrite_remove() {
        let pool = memory_pool().await;

        assert_eq!(Database::get_item(&pool, "k").await.unwrap(), None);
        Database::set_item(&pool, "k", "one").await.unwrap();
        Database::set_item(&pool, "k", "two").await.unwrap();
        assert_eq!(Database::get_item(&pool, "k").await.unwrap().as_deref(), Some("two"));

        Database::remove_item(&pool, "k").await.unwrap();
        assert_eq!(Database::get_item(&pool, "k").await.unwrap(), None);
    }
}
