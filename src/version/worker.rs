use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::cache::{Fetch, ImageCache};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Namespace of the worker's own cache inside the shared blob store.
pub const WORKER_NAMESPACE: &str = "shell/";

const UPDATES_CAPACITY: usize = 16;

/// Messages exchanged with the update worker, in the wire shape the web
/// shell uses (`{"type": "NEW_VERSION", ...}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    PrecacheImages { urls: Vec<String> },
    NewVersion { version: String, timestamp: i64 },
    VersionUpdated { version: String },
}

/// Sending side of the worker mailbox plus its broadcast of results.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    updates: broadcast::Sender<WorkerMessage>,
}

impl WorkerHandle {
    /// A handle with no worker behind it; posted messages land in the
    /// returned receiver.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        (Self { tx, updates }, rx)
    }

    pub fn post(&self, message: WorkerMessage) {
        if self.tx.send(message).is_err() {
            log_warn!("update worker is gone; message dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
        self.updates.subscribe()
    }
}

/// Background task owning the offline copy of the app shell and any images
/// it is asked to precache. It only ever touches its own namespaced cache.
pub struct UpdateWorker {
    cache: ImageCache,
    fetcher: Arc<dyn Fetch>,
    shell_resources: Vec<String>,
}

impl UpdateWorker {
    pub fn new(cache: ImageCache, fetcher: Arc<dyn Fetch>, shell_resources: Vec<String>) -> Self {
        Self {
            cache,
            fetcher,
            shell_resources,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> (WorkerHandle, JoinHandle<()>) {
        let (handle, inbox) = WorkerHandle::detached();
        let updates = handle.updates.clone();
        let task = tokio::spawn(self.run(inbox, updates, cancel));
        (handle, task)
    }

    async fn run(
        self,
        mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
        updates: broadcast::Sender<WorkerMessage>,
        cancel: CancellationToken,
    ) {
        self.cache_shell().await;

        loop {
            tokio::select! {
                message = inbox.recv() => {
                    let Some(message) = message else { break };
                    if let Some(reply) = self.handle(message).await {
                        // No subscribers is fine.
                        let _ = updates.send(reply);
                    }
                }
                _ = cancel.cancelled() => {
                    log_info!("update worker shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&self, message: WorkerMessage) -> Option<WorkerMessage> {
        match message {
            WorkerMessage::PrecacheImages { urls } => {
                let mut stored = 0;
                for url in &urls {
                    if self.store(url).await {
                        stored += 1;
                    }
                }
                log_info!("worker precached {stored}/{} images", urls.len());
                None
            }
            WorkerMessage::NewVersion { version, timestamp } => {
                log_info!("worker switching to version {version} (announced at {timestamp})");
                self.cache.clear().await;
                self.cache_shell().await;
                Some(WorkerMessage::VersionUpdated { version })
            }
            WorkerMessage::VersionUpdated { version } => {
                log_warn!("ignoring VERSION_UPDATED {version} sent to the worker");
                None
            }
        }
    }

    async fn cache_shell(&self) {
        for url in &self.shell_resources {
            self.store(url).await;
        }
    }

    async fn store(&self, url: &str) -> bool {
        if self.cache.exists(url).await {
            return false;
        }
        match self.fetcher.fetch(url).await {
            Ok(bytes) => {
                self.cache.put(url, bytes).await;
                true
            }
            Err(err) => {
                log_error!("worker failed to fetch {url}: {err:#}");
                false
            }
        }
    }
}
