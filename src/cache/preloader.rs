use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use tokio::{
    sync::{watch, Mutex},
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;

use crate::{
    events::{AppEvent, EventSink},
    version::worker::{WorkerHandle, WorkerMessage},
};

use super::{fetch::IMAGE_FETCH_TIMEOUT, Fetch, ImageCache};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const BATCH_SIZE: usize = 3;
pub const MAX_RETRIES: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// URLs still waiting to land in the cache, with their failure counts.
#[derive(Debug)]
pub struct PreloadQueue {
    pending: Vec<String>,
    retries: HashMap<String, u32>,
    max_retries: u32,
}

impl PreloadQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            pending: Vec::new(),
            retries: HashMap::new(),
            max_retries,
        }
    }

    /// Replace the pending set; placeholders and duplicates are skipped.
    pub fn replace_urls<I>(&mut self, urls: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.pending.clear();
        for url in urls {
            if is_preloadable(&url) && !self.pending.contains(&url) {
                self.pending.push(url);
            }
        }
        let pending = &self.pending;
        self.retries.retain(|url, _| pending.contains(url));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_batch(&self, size: usize) -> Vec<String> {
        self.pending.iter().take(size).cloned().collect()
    }

    pub fn record_success(&mut self, url: &str) {
        self.pending.retain(|pending| pending != url);
        self.retries.remove(url);
    }

    /// Returns the failure count, or `None` once the URL has been given up on.
    pub fn record_failure(&mut self, url: &str) -> Option<u32> {
        let retries = self.retries.entry(url.to_string()).or_insert(0);
        *retries += 1;
        let retries = *retries;

        if retries >= self.max_retries {
            self.record_success(url);
            None
        } else {
            Some(retries)
        }
    }
}

fn is_preloadable(url: &str) -> bool {
    !url.is_empty() && !url.contains("placeholder") && !url.contains("undefined")
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub cached: usize,
    pub already_cached: usize,
    pub retrying: usize,
    pub dropped: usize,
}

#[derive(Clone)]
struct PreloadContext {
    queue: Arc<Mutex<PreloadQueue>>,
    cache: ImageCache,
    fetcher: Arc<dyn Fetch>,
    worker: Option<WorkerHandle>,
    events: Arc<dyn EventSink>,
    online: watch::Receiver<bool>,
    retry_delay: Duration,
}

/// Background prefetch of catalog images into the object cache.
pub struct ImagePreloader {
    ctx: PreloadContext,
    task: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl ImagePreloader {
    pub fn new(
        cache: ImageCache,
        fetcher: Arc<dyn Fetch>,
        worker: Option<WorkerHandle>,
        events: Arc<dyn EventSink>,
        online: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx: PreloadContext {
                queue: Arc::new(Mutex::new(PreloadQueue::new(MAX_RETRIES))),
                cache,
                fetcher,
                worker,
                events,
                online,
                retry_delay: RETRY_DELAY,
            },
            task: Mutex::new(None),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.ctx.retry_delay = retry_delay;
        self
    }

    /// Point the preloader at a new URL set and make sure the loop runs.
    pub async fn resume(&self, urls: Vec<String>) {
        {
            let mut queue = self.ctx.queue.lock().await;
            queue.replace_urls(urls);
            log_info!("{} images queued for preloading", queue.len());
        }

        let mut task = self.task.lock().await;
        if let Some((handle, _)) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(preload_loop(self.ctx.clone(), cancel.clone()));
        *task = Some((handle, cancel));
    }

    pub async fn stop(&self) {
        if let Some((handle, cancel)) = self.task.lock().await.take() {
            cancel.cancel();
            if let Err(err) = handle.await {
                log_warn!("preload loop failed to join: {err}");
            }
            log_info!("image preloading stopped");
        }
    }

    pub async fn pending(&self) -> usize {
        self.ctx.queue.lock().await.len()
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|(handle, _)| !handle.is_finished())
            .unwrap_or(false)
    }
}

async fn preload_loop(ctx: PreloadContext, cancel: CancellationToken) {
    let mut first = true;
    loop {
        if ctx.queue.lock().await.is_empty() {
            log_info!("all images preloaded");
            break;
        }

        if !first {
            tokio::select! {
                _ = tokio::time::sleep(ctx.retry_delay) => {}
                _ = cancel.cancelled() => break,
            }
        }
        first = false;

        if !*ctx.online.borrow() {
            log_info!("offline, waiting before the next preload batch");
            continue;
        }

        let report = tokio::select! {
            report = preload_batch(&ctx) => report,
            _ = cancel.cancelled() => break,
        };
        log_info!(
            "preload batch: {} cached, {} already cached, {} retrying, {} dropped",
            report.cached,
            report.already_cached,
            report.retrying,
            report.dropped
        );
    }
}

async fn preload_batch(ctx: &PreloadContext) -> BatchReport {
    let batch = ctx.queue.lock().await.next_batch(BATCH_SIZE);
    let mut report = BatchReport::default();
    if batch.is_empty() {
        return report;
    }

    if let Some(worker) = &ctx.worker {
        worker.post(WorkerMessage::PrecacheImages {
            urls: batch.clone(),
        });
    }

    let mut tasks = JoinSet::new();
    for url in batch {
        let cache = ctx.cache.clone();
        let fetcher = Arc::clone(&ctx.fetcher);
        tasks.spawn(async move {
            let result = preload_single(&url, &cache, fetcher.as_ref()).await;
            (url, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (url, result) = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                log_warn!("preload task panicked: {err}");
                continue;
            }
        };

        let mut queue = ctx.queue.lock().await;
        match result {
            Ok(newly_cached) => {
                queue.record_success(&url);
                if newly_cached {
                    report.cached += 1;
                    ctx.events.emit(AppEvent::ImageCached { url });
                } else {
                    report.already_cached += 1;
                }
            }
            Err(err) => match queue.record_failure(&url) {
                Some(retries) => {
                    report.retrying += 1;
                    log_warn!("retry {retries}/{MAX_RETRIES} for {url}: {err:#}");
                }
                None => {
                    report.dropped += 1;
                    log_warn!("giving up on {url} after {MAX_RETRIES} attempts: {err:#}");
                }
            },
        }
    }

    report
}

/// `Ok(true)` when the image was fetched and stored, `Ok(false)` when it was already cached.
async fn preload_single(url: &str, cache: &ImageCache, fetcher: &dyn Fetch) -> Result<bool> {
    if cache.exists(url).await {
        return Ok(false);
    }

    let bytes = tokio::time::timeout(IMAGE_FETCH_TIMEOUT, fetcher.fetch(url))
        .await
        .map_err(|_| anyhow!("timed out after {}s", IMAGE_FETCH_TIMEOUT.as_secs()))??;

    cache.put(url, bytes).await;
    Ok(true)
}
