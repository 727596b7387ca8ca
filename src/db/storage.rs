//! Cookie storage backends.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use crate::errors::CmpError;

/// Name/value cookie persistence. This service is the sole writer.
#[async_trait]
pub trait CookieStorage: Send + Sync {
    /// Read a cookie; expired cookies read as absent.
    async fn read(&self, name: &str) -> Result<Option<String>, CmpError>;

    /// Create or replace a cookie.
    async fn write(&self, name: &str, value: &str, max_age: Duration) -> Result<(), CmpError>;

    /// Delete a cookie. Deleting a missing cookie succeeds.
    async fn remove(&self, name: &str) -> Result<(), CmpError>;
}

/// SQLite-backed cookie jar.
#[derive(Clone)]
pub struct SqliteCookieStorage {
    pool: SqlitePool,
}

impl SqliteCookieStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CookieStorage for SqliteCookieStorage {
    async fn read(&self, name: &str) -> Result<Option<String>, CmpError> {
        let row = sqlx::query("SELECT value FROM cookies WHERE name = ? AND expires_at > ?")
            .bind(name)
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn write(&self, name: &str, value: &str, max_age: Duration) -> Result<(), CmpError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .timestamp_millis();

        sqlx::query(
            "INSERT INTO cookies (name, value, updated_at, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at, expires_at = excluded.expires_at",
        )
        .bind(name)
        .bind(value)
        .bind(now.to_rfc3339())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Wrote cookie {} ({} bytes)", name, value.len());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), CmpError> {
        sqlx::query("DELETE FROM cookies WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
