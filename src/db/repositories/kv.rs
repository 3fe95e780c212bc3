use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use crate::db::{
    helpers::{from_json, to_json},
    Database,
};

/// Text key/value access to the persisted local state table.
pub struct KvRepository<'a> {
    conn: &'a Connection,
}

impl<'a> KvRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert or overwrite the whole value stored at `key`
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?
            .map(|raw| from_json(&raw, key))
            .transpose()
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, &to_json(value, key)?)
    }
}

// Database async wrappers for key/value operations
impl Database {
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| KvRepository::new(conn).get(&key))
            .await
    }

    pub async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| KvRepository::new(conn).set(&key, &value))
            .await
    }

    pub async fn kv_remove(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.execute(move |conn| KvRepository::new(conn).remove(&key))
            .await
    }

    pub async fn kv_get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        self.execute(move |conn| KvRepository::new(conn).get_json(&key))
            .await
    }

    pub async fn kv_set_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let key = key.to_string();
        let raw = to_json(value, &key)?;
        self.execute(move |conn| KvRepository::new(conn).set(&key, &raw))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[tokio::test]
    async fn set_overwrites_and_remove_reports_presence() {
        let db = Database::open_in_memory().unwrap();

        assert_eq!(db.kv_get("app_version").await.unwrap(), None);
        db.kv_set("app_version", "1.0.5").await.unwrap();
        db.kv_set("app_version", "1.0.6").await.unwrap();
        assert_eq!(
            db.kv_get("app_version").await.unwrap().as_deref(),
            Some("1.0.6")
        );

        assert!(db.kv_remove("app_version").await.unwrap());
        assert!(!db.kv_remove("app_version").await.unwrap());
    }

    #[tokio::test]
    async fn json_values_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let mut counters = HashMap::new();
        counters.insert("p-1".to_string(), 3u32);

        db.kv_set_json("consult_counters", &counters).await.unwrap();
        let loaded: HashMap<String, u32> =
            db.kv_get_json("consult_counters").await.unwrap().unwrap();
        assert_eq!(loaded, counters);
    }

    #[tokio::test]
    async fn malformed_json_is_an_error_not_a_panic() {
        let db = Database::open_in_memory().unwrap();
        db.kv_set("consult_counters", "{not json").await.unwrap();
        let result: Result<Option<HashMap<String, u32>>> =
            db.kv_get_json("consult_counters").await;
        assert!(result.is_err());
    }
}
