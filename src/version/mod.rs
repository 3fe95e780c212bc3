//! Remote config document, app version tracking and the update worker.

pub mod commands;
pub mod worker;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{error, info, warn};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    catalog::CATALOG_CACHE_KEY,
    db::Database,
    events::{AppEvent, EventSink, ToastKind},
};

pub use worker::{UpdateWorker, WorkerHandle, WorkerMessage};

pub const APP_VERSION_KEY: &str = "app_version";
pub const CACHE_VERSION_KEY: &str = "app_version_cache";
pub const APP_LAST_CHECK_KEY: &str = "app_last_check";
pub const LAST_UPDATE_CHECK_KEY: &str = "last_update_check";
pub const CONFIG_CACHE_KEY: &str = "config_cache";

fn config_cache_ttl() -> Duration {
    Duration::hours(1)
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch_config(&self) -> Result<Value>;
}

pub struct HttpConfigSource {
    client: reqwest::Client,
    url: String,
}

impl HttpConfigSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch_config(&self) -> Result<Value> {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}_={}", self.url, Utc::now().timestamp_millis());

        let response = self
            .client
            .get(&url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {status} for {url}");
        }
        response
            .json()
            .await
            .with_context(|| format!("config at {url} is not JSON"))
    }
}

/// The config's `version`, as a trimmed string. Numbers are accepted;
/// missing, empty, zero or any other type means "no version".
pub fn extract_version(config: &Value) -> Option<String> {
    match config.get("version")? {
        Value::String(version) => {
            let version = version.trim();
            (!version.is_empty()).then(|| version.to_string())
        }
        Value::Number(number) if number.as_f64() != Some(0.0) => Some(number.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub has_update: bool,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
    pub force_update: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub show_prices: bool,
    pub version: Option<String>,
    pub language: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            show_prices: false,
            version: None,
            language: None,
        }
    }
}

impl AppConfig {
    /// Reads the published document; the Spanish field names are accepted too.
    pub fn from_document(document: &Value) -> Self {
        let field = |names: &[&str]| names.iter().find_map(|name| document.get(*name));
        Self {
            show_prices: field(&["show_prices", "mostrar_precios"])
                .and_then(Value::as_bool)
                .unwrap_or(false),
            version: extract_version(document),
            language: field(&["language", "idioma"])
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedConfig {
    config: AppConfig,
    saved_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct VersionChecker {
    db: Database,
    source: Arc<dyn ConfigSource>,
    worker: Option<WorkerHandle>,
    events: Arc<dyn EventSink>,
}

impl VersionChecker {
    pub fn new(
        db: Database,
        source: Arc<dyn ConfigSource>,
        worker: Option<WorkerHandle>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            db,
            source,
            worker,
            events,
        }
    }

    /// The version the last update check acknowledged.
    pub async fn stored_version(&self) -> Option<String> {
        self.read_version(APP_VERSION_KEY).await
    }

    /// The version the cached catalog and config were loaded for.
    pub async fn cache_version(&self) -> Option<String> {
        self.read_version(CACHE_VERSION_KEY).await
    }

    async fn read_version(&self, key: &str) -> Option<String> {
        match self.db.kv_get(key).await {
            Ok(version) => version.filter(|version| !version.is_empty()),
            Err(err) => {
                warn!("Failed to read {key}: {err:#}");
                None
            }
        }
    }

    /// One update cycle. Never fails; an unusable config is "no update".
    pub async fn check_update(&self) -> UpdateStatus {
        let config = match self.source.fetch_config().await {
            Ok(config) => config,
            Err(err) => {
                warn!("Version check failed: {err:#}");
                return UpdateStatus::default();
            }
        };

        let Some(new_version) = extract_version(&config) else {
            error!("Config document has no usable version");
            return UpdateStatus::default();
        };

        let old_version = self.stored_version().await;
        if old_version.as_deref() == Some(new_version.as_str()) {
            info!("Version {new_version} is current");
            return UpdateStatus::default();
        }

        info!(
            "Version changed: {} -> {new_version}",
            old_version.as_deref().unwrap_or("none")
        );
        let force_update = config
            .get("force_update")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        self.set(APP_VERSION_KEY, &new_version).await;
        self.set(APP_LAST_CHECK_KEY, &Utc::now().timestamp_millis().to_string())
            .await;

        if self.mark_once(&format!("notified_{new_version}")).await {
            self.events.emit(AppEvent::VersionUpdate {
                old_version: old_version.clone(),
                new_version: new_version.clone(),
                force_update,
            });
            self.events.emit(AppEvent::toast(
                format!("New version {new_version} available. Reloading..."),
                ToastKind::Info,
            ));
        }

        self.announce_to_worker(&new_version);

        if self.mark_once(&format!("reloaded_{new_version}")).await {
            self.events.emit(AppEvent::ReloadRequested {
                version: new_version.clone(),
            });
        }

        UpdateStatus {
            has_update: true,
            old_version,
            new_version: Some(new_version),
            force_update,
        }
    }

    /// Whether today's first check is still pending.
    pub async fn daily_check_due(&self, today: NaiveDate) -> bool {
        match self.db.kv_get(LAST_UPDATE_CHECK_KEY).await {
            Ok(last) => last.as_deref() != Some(today.to_string().as_str()),
            Err(err) => {
                warn!("Failed to read last update check: {err:#}");
                true
            }
        }
    }

    pub async fn mark_daily_check(&self, today: NaiveDate) {
        self.set(LAST_UPDATE_CHECK_KEY, &today.to_string()).await;
    }

    /// Fetch the app config. A new version drops the cached catalog and
    /// config; images, queues and counters are kept. The acknowledged app
    /// version is left to `check_update`.
    pub async fn load_app_config(&self) -> AppConfig {
        let document = match self.source.fetch_config().await {
            Ok(document) => document,
            Err(err) => {
                warn!("Failed to load config, trying cache: {err:#}");
                return self.cached_config_at(Utc::now()).await.unwrap_or_default();
            }
        };

        let config = AppConfig::from_document(&document);
        if let Some(version) = &config.version {
            if self.cache_version().await.as_deref() != Some(version.as_str()) {
                info!("New version {version} on load; clearing data caches");
                self.clear_data_caches().await;
                self.set(CACHE_VERSION_KEY, version).await;
                self.announce_to_worker(version);
            }
        }

        let cached = CachedConfig {
            config: config.clone(),
            saved_at: Utc::now(),
        };
        if let Err(err) = self.db.kv_set_json(CONFIG_CACHE_KEY, &cached).await {
            warn!("Failed to cache config: {err:#}");
        }
        config
    }

    async fn cached_config_at(&self, now: DateTime<Utc>) -> Option<AppConfig> {
        let cached = match self.db.kv_get_json::<CachedConfig>(CONFIG_CACHE_KEY).await {
            Ok(cached) => cached?,
            Err(err) => {
                warn!("Failed to read cached config: {err:#}");
                return None;
            }
        };

        if now - cached.saved_at < config_cache_ttl() {
            info!("Using cached config from {}", cached.saved_at);
            Some(cached.config)
        } else {
            info!("Cached config expired");
            None
        }
    }

    async fn clear_data_caches(&self) {
        for key in [CATALOG_CACHE_KEY, CONFIG_CACHE_KEY] {
            if let Err(err) = self.db.kv_remove(key).await {
                warn!("Failed to clear {key}: {err:#}");
            }
        }
    }

    fn announce_to_worker(&self, version: &str) {
        if let Some(worker) = &self.worker {
            worker.post(WorkerMessage::NewVersion {
                version: version.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            });
        }
    }

    /// Sets a marker key; true when it was not set before.
    async fn mark_once(&self, key: &str) -> bool {
        match self.db.kv_get(key).await {
            Ok(Some(_)) => false,
            Ok(None) => {
                self.set(key, "true").await;
                true
            }
            Err(err) => {
                warn!("Failed to read marker {key}: {err:#}");
                false
            }
        }
    }

    async fn set(&self, key: &str, value: &str) {
        if let Err(err) = self.db.kv_set(key, value).await {
            warn!("Failed to store {key}: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::events::ChannelSink;

    struct ScriptedConfig(Mutex<Option<Value>>);

    impl ScriptedConfig {
        fn serving(value: Value) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(value))))
        }

        fn set(&self, value: Option<Value>) {
            *self.0.lock().unwrap() = value;
        }
    }

    #[async_trait]
    impl ConfigSource for ScriptedConfig {
        async fn fetch_config(&self) -> Result<Value> {
            self.0.lock().unwrap().clone().ok_or_else(|| anyhow!("offline"))
        }
    }

    struct Harness {
        checker: VersionChecker,
        source: Arc<ScriptedConfig>,
        db: Database,
        events: mpsc::UnboundedReceiver<AppEvent>,
        worker: mpsc::UnboundedReceiver<WorkerMessage>,
    }

    fn harness(config: Value) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let source = ScriptedConfig::serving(config);
        let (sink, events) = ChannelSink::new();
        let (worker_handle, worker) = WorkerHandle::detached();
        let checker = VersionChecker::new(
            db.clone(),
            source.clone(),
            Some(worker_handle),
            Arc::new(sink),
        );
        Harness {
            checker,
            source,
            db,
            events,
            worker,
        }
    }

    async fn row_count(db: &Database) -> i64 {
        db.execute(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))?)
        })
        .await
        .unwrap()
    }

    #[test]
    fn versions_may_be_strings_or_numbers() {
        assert_eq!(extract_version(&json!({"version": " 1.0.6 "})).as_deref(), Some("1.0.6"));
        assert_eq!(extract_version(&json!({"version": 2})).as_deref(), Some("2"));
        assert_eq!(extract_version(&json!({"version": 1.5})).as_deref(), Some("1.5"));
        assert_eq!(extract_version(&json!({"version": ""})), None);
        assert_eq!(extract_version(&json!({"version": 0})), None);
        assert_eq!(extract_version(&json!({"version": true})), None);
        assert_eq!(extract_version(&json!({})), None);
    }

    #[tokio::test]
    async fn config_without_version_is_no_update_and_writes_nothing() {
        let mut h = harness(json!({}));

        assert_eq!(h.checker.check_update().await, UpdateStatus::default());
        assert_eq!(row_count(&h.db).await, 0);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_version_notifies_once_and_reloads_once() {
        let mut h = harness(json!({"version": "1.0.6", "force_update": true}));

        let status = h.checker.check_update().await;
        assert_eq!(
            status,
            UpdateStatus {
                has_update: true,
                old_version: None,
                new_version: Some("1.0.6".into()),
                force_update: true,
            }
        );
        assert_eq!(h.checker.stored_version().await.as_deref(), Some("1.0.6"));
        assert!(h.db.kv_get(APP_LAST_CHECK_KEY).await.unwrap().is_some());

        let events: Vec<AppEvent> = std::iter::from_fn(|| h.events.try_recv().ok()).collect();
        assert!(events.contains(&AppEvent::VersionUpdate {
            old_version: None,
            new_version: "1.0.6".into(),
            force_update: true,
        }));
        assert!(events.contains(&AppEvent::ReloadRequested {
            version: "1.0.6".into()
        }));
        assert!(matches!(
            h.worker.try_recv().unwrap(),
            WorkerMessage::NewVersion { version, .. } if version == "1.0.6"
        ));

        // Same version again: nothing to do.
        assert!(!h.checker.check_update().await.has_update);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn returning_to_a_seen_version_skips_markers() {
        let mut h = harness(json!({"version": "2"}));
        h.checker.check_update().await;
        h.source.set(Some(json!({"version": "3"})));
        h.checker.check_update().await;
        while h.events.try_recv().is_ok() {}

        h.source.set(Some(json!({"version": 2})));
        let status = h.checker.check_update().await;

        assert!(status.has_update);
        assert_eq!(status.old_version.as_deref(), Some("3"));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_config_is_no_update() {
        let h = harness(json!({}));
        h.source.set(None);
        assert_eq!(h.checker.check_update().await, UpdateStatus::default());
    }

    #[tokio::test]
    async fn daily_check_is_tracked_by_date() {
        let h = harness(json!({}));
        let today = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();

        assert!(h.checker.daily_check_due(today).await);
        h.checker.mark_daily_check(today).await;
        assert!(!h.checker.daily_check_due(today).await);
        assert!(h.checker.daily_check_due(today.succ_opt().unwrap()).await);
    }

    #[tokio::test]
    async fn new_version_on_load_clears_data_caches_only() {
        let h = harness(json!({"version": "1.1.0", "mostrar_precios": true}));
        h.db.kv_set(APP_VERSION_KEY, "1.0.0").await.unwrap();
        h.db.kv_set(CATALOG_CACHE_KEY, "{}").await.unwrap();
        h.db.kv_set("consult_counters", "{\"p\":1}").await.unwrap();

        let config = h.checker.load_app_config().await;

        assert!(config.show_prices);
        assert_eq!(config.version.as_deref(), Some("1.1.0"));
        assert_eq!(h.db.kv_get(CATALOG_CACHE_KEY).await.unwrap(), None);
        assert!(h.db.kv_get("consult_counters").await.unwrap().is_some());
        assert!(h.db.kv_get(CONFIG_CACHE_KEY).await.unwrap().is_some());
        assert_eq!(h.checker.cache_version().await.as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn load_leaves_the_update_to_the_checker() {
        let mut h = harness(json!({"version": "1.1.0"}));
        h.db.kv_set(APP_VERSION_KEY, "1.0.0").await.unwrap();

        h.checker.load_app_config().await;
        assert_eq!(h.checker.stored_version().await.as_deref(), Some("1.0.0"));
        while h.events.try_recv().is_ok() {}

        let status = h.checker.check_update().await;
        assert!(status.has_update);
        assert_eq!(status.old_version.as_deref(), Some("1.0.0"));
        let events: Vec<AppEvent> = std::iter::from_fn(|| h.events.try_recv().ok()).collect();
        assert!(events.contains(&AppEvent::ReloadRequested {
            version: "1.1.0".into()
        }));

        // A second load for the same version keeps the data caches.
        h.db.kv_set(CATALOG_CACHE_KEY, "[]").await.unwrap();
        h.checker.load_app_config().await;
        assert!(h.db.kv_get(CATALOG_CACHE_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_load_uses_fresh_cache_only() {
        let h = harness(json!({"version": "1.0.0", "show_prices": true, "language": "es"}));
        let loaded = h.checker.load_app_config().await;
        h.source.set(None);

        assert_eq!(h.checker.load_app_config().await, loaded);
        assert_eq!(
            h.checker
                .cached_config_at(Utc::now() + Duration::minutes(61))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn failed_load_without_cache_is_default() {
        let h = harness(json!({}));
        h.source.set(None);
        assert_eq!(h.checker.load_app_config().await, AppConfig::default());
    }
}
