use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use log::info;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::ImagePreloader,
    catalog::CatalogStore,
    events::{AppEvent, EventSink, ToastKind},
    notify::Dispatcher,
    version::VersionChecker,
};

/// Delays for the background triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub preload_delay: Duration,
    pub startup_flush_delay: Duration,
    pub version_check_delay: Duration,
    pub version_check_interval: Duration,
    pub reconnect_flush_delay: Duration,
    pub reconnect_version_delay: Duration,
}

impl Schedule {
    pub fn standard() -> Self {
        Self {
            preload_delay: Duration::from_secs(1),
            startup_flush_delay: Duration::from_secs(5),
            version_check_delay: Duration::from_secs(10),
            version_check_interval: Duration::from_secs(4 * 60 * 60),
            reconnect_flush_delay: Duration::from_secs(3),
            reconnect_version_delay: Duration::from_secs(5),
        }
    }

    pub fn debug() -> Self {
        Self {
            preload_delay: Duration::from_millis(100),
            startup_flush_delay: Duration::from_millis(500),
            version_check_delay: Duration::from_secs(1),
            version_check_interval: Duration::from_secs(60),
            reconnect_flush_delay: Duration::from_millis(300),
            reconnect_version_delay: Duration::from_millis(500),
        }
    }

    /// `SHOPFRONT_DEBUG=1` (or `true`) selects the short debug delays.
    pub fn from_env() -> Self {
        let debug_mode = std::env::var("SHOPFRONT_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_mode {
            Self::debug()
        } else {
            Self::standard()
        }
    }
}

/// Connectivity plus the startup and periodic triggers.
#[derive(Clone)]
pub struct Lifecycle {
    online: Arc<watch::Sender<bool>>,
    dispatcher: Dispatcher,
    preloader: Arc<ImagePreloader>,
    catalog: Arc<CatalogStore>,
    version: VersionChecker,
    events: Arc<dyn EventSink>,
    schedule: Schedule,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Lifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        online: watch::Sender<bool>,
        dispatcher: Dispatcher,
        preloader: Arc<ImagePreloader>,
        catalog: Arc<CatalogStore>,
        version: VersionChecker,
        events: Arc<dyn EventSink>,
        schedule: Schedule,
    ) -> Self {
        Self {
            online: Arc::new(online),
            dispatcher,
            preloader,
            catalog,
            version,
            events,
            schedule,
            cancel: CancellationToken::new(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub async fn start(&self) {
        let preloader = Arc::clone(&self.preloader);
        let catalog = Arc::clone(&self.catalog);
        self.spawn_after(self.schedule.preload_delay, async move {
            preloader.resume(catalog.current().await.image_urls()).await;
        })
        .await;

        let this = self.clone();
        self.spawn_after(self.schedule.startup_flush_delay, async move {
            if this.is_online() {
                info!("Startup flush of pending queues");
                this.dispatcher.flush_spreadsheet().await;
                this.dispatcher.flush_consults().await;
            }
        })
        .await;

        let this = self.clone();
        self.spawn_after(self.schedule.version_check_delay, async move {
            this.version_loop().await;
        })
        .await;
    }

    async fn version_loop(&self) {
        let today = Utc::now().date_naive();
        if self.version.daily_check_due(today).await {
            info!("Running daily version check");
            self.version.check_update().await;
            self.version.mark_daily_check(today).await;
        }

        let mut interval = tokio::time::interval(self.schedule.version_check_interval);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("Periodic version check");
                    self.version.check_update().await;
                }
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    pub async fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if !changed {
            return;
        }

        self.events.emit(AppEvent::ConnectivityChanged { online });
        if !online {
            info!("Connectivity lost");
            self.events.emit(AppEvent::toast(
                "You are offline - showing saved content",
                ToastKind::Info,
            ));
            return;
        }

        info!("Connectivity restored");
        self.events.emit(AppEvent::toast("Connection restored", ToastKind::Success));

        let preloader = Arc::clone(&self.preloader);
        let catalog = Arc::clone(&self.catalog);
        self.spawn_after(Duration::ZERO, async move {
            preloader.resume(catalog.current().await.image_urls()).await;
        })
        .await;

        let dispatcher = self.dispatcher.clone();
        self.spawn_after(Duration::ZERO, async move {
            dispatcher.flush_notifications().await;
        })
        .await;

        let dispatcher = self.dispatcher.clone();
        self.spawn_after(self.schedule.reconnect_flush_delay, async move {
            dispatcher.flush_spreadsheet().await;
            dispatcher.flush_consults().await;
        })
        .await;

        let version = self.version.clone();
        self.spawn_after(self.schedule.reconnect_version_delay, async move {
            version.check_update().await;
        })
        .await;
    }

    async fn spawn_after<F>(&self, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = async {
                    tokio::time::sleep(delay).await;
                    work.await;
                } => {}
                _ = cancel.cancelled() => {}
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.preloader.stop().await;
        info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        cache::{Fetch, ImageCache},
        catalog::{ContactChannel, ImageUrls, Product, RawProduct},
        db::Database,
        events::ChannelSink,
        notify::{ConsultEvent, SheetRow, UserInfo},
        queue::Deliver,
        version::ConfigSource,
    };

    #[derive(Default)]
    struct Counting {
        ok: std::sync::atomic::AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Deliver<ConsultEvent> for Counting {
        async fn deliver(&self, _event: &ConsultEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(anyhow!("down"))
            }
        }
    }

    #[async_trait]
    impl Deliver<SheetRow> for Counting {
        async fn deliver(&self, _row: &SheetRow) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoImages;

    #[async_trait]
    impl Fetch for NoImages {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            Err(anyhow!("no network in tests"))
        }
    }

    struct CountingConfig(AtomicUsize);

    #[async_trait]
    impl ConfigSource for CountingConfig {
        async fn fetch_config(&self) -> Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"version": "1.0.0"}))
        }
    }

    struct Harness {
        lifecycle: Lifecycle,
        dispatcher: Dispatcher,
        email: Arc<Counting>,
        config: Arc<CountingConfig>,
        events: mpsc::UnboundedReceiver<AppEvent>,
        db: Database,
    }

    fn harness(online: bool) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let (sink, events) = ChannelSink::new();
        let events_sink: Arc<dyn EventSink> = Arc::new(sink);
        let (online_tx, online_rx) = watch::channel(online);

        let email = Arc::new(Counting::default());
        let sheet = Arc::new(Counting::default());
        let dispatcher = Dispatcher::new(
            db.clone(),
            email.clone(),
            sheet,
            events_sink.clone(),
            online_rx.clone(),
        );
        let preloader = Arc::new(ImagePreloader::new(
            ImageCache::new(db.clone()),
            Arc::new(NoImages),
            None,
            events_sink.clone(),
            online_rx,
        ));
        let config = Arc::new(CountingConfig(AtomicUsize::new(0)));
        let version = VersionChecker::new(db.clone(), config.clone(), None, events_sink.clone());
        let lifecycle = Lifecycle::new(
            online_tx,
            dispatcher.clone(),
            preloader,
            Arc::new(CatalogStore::new(db.clone())),
            version,
            events_sink,
            Schedule::standard(),
        );

        Harness {
            lifecycle,
            dispatcher,
            email,
            config,
            events,
            db,
        }
    }

    fn consult() -> ConsultEvent {
        let raw: RawProduct = serde_json::from_value(json!({"id": "p-1", "name": "Lamp"})).unwrap();
        let product = Product::from_raw(raw, &ImageUrls::new("./img/", None));
        ConsultEvent::new(ContactChannel::Call, UserInfo::current("s"), &product, None)
    }

    /// Polls in short virtual-time steps so the paused clock never jumps
    /// past a pending trigger while the database thread is answering.
    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..3000 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn debug_schedule_is_shorter() {
        assert!(Schedule::debug().version_check_delay < Schedule::standard().version_check_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_flushes_queues_and_checks_version() {
        let mut h = harness(false);
        h.dispatcher.dispatch(consult()).await;
        assert_eq!(h.dispatcher.pending().await.consults, 1);
        while h.events.try_recv().is_ok() {}

        h.email.ok.store(true, Ordering::SeqCst);
        let restored_at = tokio::time::Instant::now();
        h.lifecycle.set_online(true).await;
        assert_eq!(
            h.events.try_recv().unwrap(),
            AppEvent::ConnectivityChanged { online: true }
        );

        let dispatcher = h.dispatcher.clone();
        eventually(|| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.pending().await.consults == 0 }
        })
        .await;
        assert!(restored_at.elapsed() >= Duration::from_secs(3));
        assert_eq!(h.email.calls.load(Ordering::SeqCst), 1);

        let config = Arc::clone(&h.config);
        eventually(|| {
            let config = Arc::clone(&config);
            async move { config.0.load(Ordering::SeqCst) == 1 }
        })
        .await;
        assert!(restored_at.elapsed() >= Duration::from_secs(5));

        h.lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connectivity_reports_are_ignored() {
        let mut h = harness(true);
        h.lifecycle.set_online(true).await;
        assert!(h.events.try_recv().is_err());

        h.lifecycle.set_online(false).await;
        assert!(!h.lifecycle.is_online());
        assert_eq!(
            h.events.try_recv().unwrap(),
            AppEvent::ConnectivityChanged { online: false }
        );
        h.lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn version_check_runs_daily_then_periodically() {
        let h = harness(true);
        let started_at = tokio::time::Instant::now();
        h.lifecycle.start().await;

        let db = h.db.clone();
        eventually(|| {
            let db = db.clone();
            async move { db.kv_get("last_update_check").await.unwrap().is_some() }
        })
        .await;
        assert!(started_at.elapsed() >= Duration::from_secs(10));
        assert_eq!(h.config.0.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(4 * 60 * 60)).await;
        let config = Arc::clone(&h.config);
        eventually(|| {
            let config = Arc::clone(&config);
            async move { config.0.load(Ordering::SeqCst) == 2 }
        })
        .await;

        h.lifecycle.shutdown().await;
        assert!(h.db.kv_get("app_version").await.unwrap().is_some());
    }
}
