//! Cache persistence
//!
//! Backs `mixtape_sync::Cache` so entries survive a restart.

use crate::error::Result;
use crate::time;
use async_trait::async_trait;
use mixtape_sync::{CacheEntry, CacheStore};
use sqlx::{Row, SqlitePool};

pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load(&self) -> Result<Vec<(String, CacheEntry)>> {
        let rows = sqlx::query("SELECT key, value, expires_at, stale, updated_at FROM cache_entries")
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")?;
            let raw: String = row.try_get("value")?;
            let value = match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => value,
                Err(e) => {
                    // A bad row only costs one refetch
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable cache row");
                    continue;
                }
            };
            entries.push((
                key,
                CacheEntry {
                    value,
                    expires_at: time::decode(
                        "cache_entries.expires_at",
                        &row.try_get::<String, _>("expires_at")?,
                    )?,
                    stale: row.try_get::<i64, _>("stale")? != 0,
                    updated_at: time::decode(
                        "cache_entries.updated_at",
                        &row.try_get::<String, _>("updated_at")?,
                    )?,
                },
            ));
        }
        Ok(entries)
    }

    async fn save(&self, entries: Vec<(String, CacheEntry)>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, entry) in entries {
            sqlx::query(
                r#"
                INSERT INTO cache_entries (key, value, expires_at, stale, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (key) DO UPDATE SET
                    value = excluded.value,
                    expires_at = excluded.expires_at,
                    stale = excluded.stale,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&key)
            .bind(serde_json::to_string(&entry.value)?)
            .bind(time::encode(&entry.expires_at))
            .bind(i64::from(entry.stale))
            .bind(time::encode(&entry.updated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, keys: Vec<String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn load_all(&self) -> mixtape_core::Result<Vec<(String, CacheEntry)>> {
        Ok(self.load().await?)
    }

    async fn save_many(&self, entries: Vec<(String, CacheEntry)>) -> mixtape_core::Result<()> {
        Ok(self.save(entries).await?)
    }

    async fn remove_many(&self, keys: Vec<String>) -> mixtape_core::Result<()> {
        Ok(self.delete(keys).await?)
    }
}
