pub mod cache;
pub mod catalog;
pub mod db;
pub mod events;
pub mod host;
pub mod lifecycle;
pub mod navigation;
pub mod notify;
pub mod queue;
pub mod settings;
pub mod utils;
pub mod version;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use cache::{fetch::IMAGE_FETCH_TIMEOUT, Fetch, HttpFetcher, ImageCache, ImagePreloader};
use catalog::{CatalogStore, HttpProductSource, ProductSource};
use db::Database;
use events::{EventSink, JsonLinesSink};
use lifecycle::{Lifecycle, Schedule};
use log::{error, info, warn};
use navigation::NavigationController;
use notify::{ConsultEvent, DeviceInfo, Dispatcher, EmailWebhook, SheetRow, SheetWebhook};
use queue::Deliver;
use settings::SettingsStore;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use version::{
    worker::WORKER_NAMESPACE, AppConfig, ConfigSource, HttpConfigSource, UpdateWorker,
    VersionChecker, WorkerHandle,
};

/// The outside world as the core sees it.
pub struct Connectors {
    pub config: Arc<dyn ConfigSource>,
    pub products: Arc<dyn ProductSource>,
    pub email: Arc<dyn Deliver<ConsultEvent>>,
    pub sheet: Arc<dyn Deliver<SheetRow>>,
    pub images: Arc<dyn Fetch>,
}

impl Connectors {
    pub fn http(settings: &SettingsStore) -> Result<Self> {
        let endpoints = settings.endpoints();
        let contact = settings.contact();

        Ok(Self {
            config: Arc::new(HttpConfigSource::new(endpoints.config_url)?),
            products: Arc::new(HttpProductSource::new(endpoints.products_url)?),
            email: Arc::new(EmailWebhook::new(
                endpoints.email_webhook,
                contact.vendor_name,
                contact.email,
            )?),
            sheet: Arc::new(SheetWebhook::new(endpoints.sheet_webhook)?),
            images: Arc::new(HttpFetcher::images()?),
        })
    }
}

pub struct AppState {
    pub(crate) db: Database,
    pub(crate) settings: SettingsStore,
    pub(crate) navigation: NavigationController,
    pub(crate) catalog: Arc<CatalogStore>,
    pub(crate) products: Arc<dyn ProductSource>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) images: ImageCache,
    pub(crate) preloader: Arc<ImagePreloader>,
    pub(crate) version: VersionChecker,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) config: RwLock<AppConfig>,
    pub(crate) session_id: String,
    pub(crate) device: Option<DeviceInfo>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        settings: SettingsStore,
        connectors: Connectors,
        events: Arc<dyn EventSink>,
        worker: Option<WorkerHandle>,
        device: Option<DeviceInfo>,
        online: bool,
        schedule: Schedule,
    ) -> Self {
        let (online_tx, online_rx) = watch::channel(online);

        let navigation = NavigationController::new(events.clone(), settings.exit_capabilities());
        let catalog = Arc::new(CatalogStore::new(db.clone()));
        let dispatcher = Dispatcher::new(
            db.clone(),
            connectors.email,
            connectors.sheet,
            events.clone(),
            online_rx.clone(),
        );
        let images = ImageCache::new(db.clone());
        let preloader = Arc::new(ImagePreloader::new(
            images.clone(),
            connectors.images,
            worker.clone(),
            events.clone(),
            online_rx,
        ));
        let version = VersionChecker::new(db.clone(), connectors.config, worker, events.clone());
        let lifecycle = Lifecycle::new(
            online_tx,
            dispatcher.clone(),
            Arc::clone(&preloader),
            Arc::clone(&catalog),
            version.clone(),
            events,
            schedule,
        );

        Self {
            db,
            settings,
            navigation,
            catalog,
            products: connectors.products,
            dispatcher,
            images,
            preloader,
            version,
            lifecycle,
            config: RwLock::new(AppConfig::default()),
            session_id: notify::generate_session_id(),
            device,
        }
    }
}

fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("SHOPFRONT_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("shopfront"))
        .context("no data directory on this platform")
}

async fn host_main() -> Result<()> {
    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let database = Database::new(data_dir.join("shopfront.sqlite3"))?;
    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let shell_resources = settings_store.endpoints().shell_resources;

    let worker_cancel = CancellationToken::new();
    let (worker, worker_task) = UpdateWorker::new(
        ImageCache::namespaced(database.clone(), WORKER_NAMESPACE),
        Arc::new(HttpFetcher::resources(IMAGE_FETCH_TIMEOUT)?),
        shell_resources,
    )
    .spawn(worker_cancel.clone());

    let device = match tokio::task::spawn_blocking(DeviceInfo::collect).await {
        Ok(device) => Some(device),
        Err(err) => {
            warn!("Device info unavailable: {err}");
            None
        }
    };

    let output = Arc::new(JsonLinesSink::stdout());
    let connectors = Connectors::http(&settings_store)?;
    let state = AppState::new(
        database,
        settings_store,
        connectors,
        output.clone(),
        Some(worker),
        device,
        true,
        Schedule::from_env(),
    );

    match catalog::commands::load_catalog(&state).await {
        Ok(summary) => info!(
            "Startup catalog: {} products ({:?})",
            summary.product_count, summary.origin
        ),
        Err(err) => warn!("Startup catalog load failed: {err}"),
    }
    state.lifecycle.start().await;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let served = host::serve(&state, stdin, output.as_ref()).await;

    state.lifecycle.shutdown().await;
    worker_cancel.cancel();
    if let Err(err) = worker_task.await {
        warn!("Update worker ended abnormally: {err}");
    }
    served
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Shopfront starting up...");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(host_main()) {
        error!("Shopfront stopped with error: {err:#}");
        std::process::exit(1);
    }
    info!("Shopfront stopped");
}
