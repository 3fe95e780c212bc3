use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{helpers::parse_datetime, models::CachedBlob, Database};

pub struct BlobRepository<'a> {
    conn: &'a Connection,
}

impl<'a> BlobRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO image_cache (key, data, stored_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 data = excluded.data,
                 stored_at = excluded.stored_at",
            params![key, data, now],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<CachedBlob>> {
        let row = self
            .conn
            .query_row(
                "SELECT key, data, stored_at FROM image_cache WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(key, data, stored_at)| {
            Ok(CachedBlob {
                key,
                data,
                stored_at: parse_datetime(&stored_at, "stored_at")?,
            })
        })
        .transpose()
    }

    /// Remove every entry whose key starts with `prefix`; an empty prefix clears the table
    pub fn clear(&self, prefix: &str) -> Result<usize> {
        let pattern = format!("{}%", escape_like(prefix));
        self.conn
            .execute(
                "DELETE FROM image_cache WHERE key LIKE ?1 ESCAPE '\\'",
                params![pattern],
            )
            .context("failed to clear image cache")
    }

    pub fn count(&self, prefix: &str) -> Result<usize> {
        let pattern = format!("{}%", escape_like(prefix));
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM image_cache WHERE key LIKE ?1 ESCAPE '\\'",
            params![pattern],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// Database async wrappers for blob operations
impl Database {
    pub async fn blob_put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| BlobRepository::new(conn).put(&key, &data))
            .await
    }

    pub async fn blob_get(&self, key: &str) -> Result<Option<CachedBlob>> {
        let key = key.to_string();
        self.execute(move |conn| BlobRepository::new(conn).get(&key))
            .await
    }

    pub async fn blob_clear(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.to_string();
        self.execute(move |conn| BlobRepository::new(conn).clear(&prefix))
            .await
    }

    pub async fn blob_count(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.to_string();
        self.execute(move |conn| BlobRepository::new(conn).count(&prefix))
            .await
    }
}
