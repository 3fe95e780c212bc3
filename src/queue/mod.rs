//! Persisted retry queues.
//!
//! Each queue is one JSON list stored under its own key in the local state
//! table and rewritten whole on every change. A flush makes a single pass:
//! delivered items disappear, failed items gain an attempt, and items that
//! had already used their attempt budget are dropped.

use std::{collections::HashSet, fmt, marker::PhantomData, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{Database, KvRepository};

pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum QueueName {
    Notifications,
    SpreadsheetLog,
    Consults,
}

impl QueueName {
    pub fn storage_key(&self) -> &'static str {
        match self {
            QueueName::Notifications => "queue:notifications",
            QueueName::SpreadsheetLog => "queue:spreadsheet",
            QueueName::Consults => "queue:consults",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_key())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem<T> {
    pub id: String,
    pub payload: T,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl<T> QueueItem<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

/// Something that can attempt delivery of a queued payload.
#[async_trait]
pub trait Deliver<T>: Send + Sync {
    async fn deliver(&self, payload: &T) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub delivered: usize,
    pub retained: usize,
    pub dropped: usize,
    /// Another flush of the same queue was already in progress.
    pub skipped: bool,
}

pub struct RetryQueue<T> {
    name: QueueName,
    db: Database,
    max_attempts: u32,
    flushing: Arc<Mutex<()>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for RetryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            db: self.db.clone(),
            max_attempts: self.max_attempts,
            flushing: Arc::clone(&self.flushing),
            _payload: PhantomData,
        }
    }
}

impl<T> RetryQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: QueueName, db: Database) -> Self {
        Self {
            name,
            db,
            max_attempts: MAX_ATTEMPTS,
            flushing: Arc::new(Mutex::new(())),
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    pub async fn enqueue(&self, payload: T) {
        let item = QueueItem::new(payload);
        let key = self.name.storage_key();
        let result = self
            .db
            .execute(move |conn| {
                let repo = KvRepository::new(conn);
                let mut items: Vec<QueueItem<T>> = load_items(&repo, key);
                items.push(item);
                repo.set_json(key, &items)?;
                Ok(items.len())
            })
            .await;

        match result {
            Ok(len) => info!("Queued item in {} ({len} pending)", self.name),
            Err(err) => warn!("Failed to persist item in {}: {err:#}", self.name),
        }
    }

    pub async fn items(&self) -> Vec<QueueItem<T>> {
        let key = self.name.storage_key();
        self.db
            .execute(move |conn| Ok(load_items(&KvRepository::new(conn), key)))
            .await
            .unwrap_or_else(|err| {
                warn!("Failed to read {key}: {err:#}");
                Vec::new()
            })
    }

    pub async fn len(&self) -> usize {
        self.items().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// One delivery pass over the persisted items.
    pub async fn flush(&self, sender: &dyn Deliver<T>) -> FlushReport {
        let Ok(_guard) = self.flushing.try_lock() else {
            debug!("Flush of {} already running; skipping", self.name);
            return FlushReport {
                skipped: true,
                ..FlushReport::default()
            };
        };

        let snapshot = self.items().await;
        let mut report = FlushReport::default();
        if snapshot.is_empty() {
            return report;
        }

        info!("Flushing {} ({} pending)", self.name, snapshot.len());
        let seen: HashSet<String> = snapshot.iter().map(|item| item.id.clone()).collect();
        let mut retained = Vec::with_capacity(snapshot.len());

        for mut item in snapshot {
            if item.attempts >= self.max_attempts {
                warn!(
                    "Dropping item {} from {} after {} attempts",
                    item.id, self.name, item.attempts
                );
                report.dropped += 1;
                continue;
            }

            match sender.deliver(&item.payload).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    item.attempts += 1;
                    debug!(
                        "Delivery of {} from {} failed (attempt {}): {err:#}",
                        item.id, self.name, item.attempts
                    );
                    retained.push(item);
                }
            }
        }
        report.retained = retained.len();

        let key = self.name.storage_key();
        let result = self
            .db
            .execute(move |conn| {
                let repo = KvRepository::new(conn);
                // Keep anything enqueued while the pass was awaiting delivery.
                let current: Vec<QueueItem<T>> = load_items(&repo, key);
                retained.extend(current.into_iter().filter(|item| !seen.contains(&item.id)));
                repo.set_json(key, &retained)
            })
            .await;

        if let Err(err) = result {
            warn!("Failed to persist {} after flush: {err:#}", self.name);
        }

        info!(
            "Flushed {}: {} delivered, {} retained, {} dropped",
            self.name, report.delivered, report.retained, report.dropped
        );
        report
    }
}

fn load_items<T: DeserializeOwned>(repo: &KvRepository<'_>, key: &str) -> Vec<QueueItem<T>> {
    match repo.get_json(key) {
        Ok(items) => items.unwrap_or_default(),
        Err(err) => {
            warn!("Discarding unreadable queue {key}: {err:#}");
            Vec::new()
        }
    }
}
