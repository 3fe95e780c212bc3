//! Consult notifications: email first, spreadsheet log on success, retry
//! queues for whatever could not be delivered.

pub mod commands;
pub mod device;
pub mod http;

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    catalog::{ContactChannel, Product},
    db::{Database, KvRepository},
    events::{AppEvent, EventSink, ToastKind},
    queue::{Deliver, FlushReport, QueueName, RetryQueue},
};

pub use device::DeviceInfo;
pub use http::{EmailWebhook, SheetWebhook};

pub const CONSULT_COUNTERS_KEY: &str = "consult_counters";
const USER_AGENT_MAX: usize = 100;
const SESSION_SUFFIX_LEN: usize = 9;

pub fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SESSION_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{suffix}", Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub platform: String,
    pub language: String,
    pub user_agent: String,
}

impl UserInfo {
    pub fn current(session_id: &str) -> Self {
        let mut user_agent = format!(
            "shopfront/{} ({}; {})",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        user_agent.truncate(USER_AGENT_MAX);

        Self {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            platform: std::env::consts::OS.to_string(),
            language: language_tag(std::env::var("LANG").ok().as_deref()),
            user_agent,
        }
    }
}

/// `en_US.UTF-8` → `en-US`; unset or `C` locales read as `en`.
fn language_tag(lang: Option<&str>) -> String {
    let tag = lang
        .and_then(|lang| lang.split('.').next())
        .filter(|tag| !tag.is_empty() && *tag != "C" && *tag != "POSIX")
        .unwrap_or("en");
    tag.replace('_', "-")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
    pub price_min: f64,
    pub price_max: f64,
    pub category: String,
}

impl From<&Product> for ProductSummary {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price_min: product.price_min,
            price_max: product.price_max,
            category: product.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultEvent {
    pub timestamp: DateTime<Utc>,
    pub channel: ContactChannel,
    pub user: UserInfo,
    pub product: ProductSummary,
    pub device: Option<DeviceInfo>,
}

impl ConsultEvent {
    pub fn new(
        channel: ContactChannel,
        user: UserInfo,
        product: &Product,
        device: Option<DeviceInfo>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            channel,
            user,
            product: ProductSummary::from(product),
            device,
        }
    }
}

/// Spreadsheet projection of a consult.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetRow {
    pub product_id: String,
    pub product_name: String,
    pub product_category: String,
    pub price_min: f64,
    pub price_max: f64,
    pub date: String,
    pub time: String,
    pub contact_type: String,
    pub user_platform: String,
    pub user_agent: String,
    pub status: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ConsultEvent> for SheetRow {
    fn from(event: &ConsultEvent) -> Self {
        Self {
            product_id: event.product.id.clone(),
            product_name: event.product.name.clone(),
            product_category: event.product.category.clone(),
            price_min: event.product.price_min,
            price_max: event.product.price_max,
            date: event.timestamp.format("%Y-%m-%d").to_string(),
            time: event.timestamp.format("%H:%M:%S").to_string(),
            contact_type: event.channel.label().to_string(),
            user_platform: event.user.platform.clone(),
            user_agent: event.user.user_agent.clone(),
            status: "consult".to_string(),
            session_id: event.user.session_id.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Consults recorded on this device, per product id.
#[derive(Clone)]
pub struct ConsultCounters {
    db: Database,
}

impl ConsultCounters {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn all(&self) -> HashMap<String, u32> {
        match self.db.kv_get_json(CONSULT_COUNTERS_KEY).await {
            Ok(counters) => counters.unwrap_or_default(),
            Err(err) => {
                warn!("Failed to read consult counters: {err:#}");
                HashMap::new()
            }
        }
    }

    pub async fn get(&self, product_id: &str) -> u32 {
        self.all().await.get(product_id).copied().unwrap_or(0)
    }

    pub async fn increment(&self, product_id: &str) -> u32 {
        let product_id = product_id.to_string();
        let result = self
            .db
            .execute(move |conn| {
                let repo = KvRepository::new(conn);
                let mut counters: HashMap<String, u32> = repo
                    .get_json(CONSULT_COUNTERS_KEY)
                    .unwrap_or_default()
                    .unwrap_or_default();
                let count = counters.entry(product_id).or_insert(0);
                *count += 1;
                let count = *count;
                repo.set_json(CONSULT_COUNTERS_KEY, &counters)?;
                Ok(count)
            })
            .await;

        result.unwrap_or_else(|err| {
            warn!("Failed to update consult counters: {err:#}");
            0
        })
    }
}

/// Published plus local consult count for display.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultTotals {
    pub total: u32,
    /// Drives the "+N new" badge.
    pub local: u32,
}

impl ConsultTotals {
    pub fn new(published: u32, local: u32) -> Self {
        Self {
            total: published + local,
            local,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DispatchOutcome {
    Delivered,
    Queued,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingCounts {
    pub notifications: usize,
    pub spreadsheet: usize,
    pub consults: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    email: Arc<dyn Deliver<ConsultEvent>>,
    sheet: Arc<dyn Deliver<SheetRow>>,
    notifications: RetryQueue<ConsultEvent>,
    spreadsheet: RetryQueue<SheetRow>,
    consults: RetryQueue<ConsultEvent>,
    counters: ConsultCounters,
    events: Arc<dyn EventSink>,
    online: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        email: Arc<dyn Deliver<ConsultEvent>>,
        sheet: Arc<dyn Deliver<SheetRow>>,
        events: Arc<dyn EventSink>,
        online: watch::Receiver<bool>,
    ) -> Self {
        Self {
            email,
            sheet,
            notifications: RetryQueue::new(QueueName::Notifications, db.clone()),
            spreadsheet: RetryQueue::new(QueueName::SpreadsheetLog, db.clone()),
            consults: RetryQueue::new(QueueName::Consults, db.clone()),
            counters: ConsultCounters::new(db),
            events,
            online,
        }
    }

    pub fn counters(&self) -> &ConsultCounters {
        &self.counters
    }

    /// Never fails: anything that cannot be sent now is queued.
    pub async fn dispatch(&self, event: ConsultEvent) -> DispatchOutcome {
        if !*self.online.borrow() {
            info!("Offline; queueing consult for {}", event.product.id);
            self.consults.enqueue(event).await;
            self.toast("Offline - it will be sent later", ToastKind::Info);
            return DispatchOutcome::Queued;
        }

        match self.email.deliver(&event).await {
            Ok(()) => {
                self.record_delivery(&event).await;
                info!("Consult registered for {}", event.product.id);
                self.toast("Interest registered", ToastKind::Success);
                DispatchOutcome::Delivered
            }
            Err(err) => {
                warn!("Email notification failed, queueing: {err:#}");
                self.notifications.enqueue(event).await;
                self.toast("No connection - it will be sent later", ToastKind::Info);
                DispatchOutcome::Queued
            }
        }
    }

    async fn record_delivery(&self, event: &ConsultEvent) {
        self.counters.increment(&event.product.id).await;

        let row = SheetRow::from(event);
        if let Err(err) = self.sheet.deliver(&row).await {
            warn!("Spreadsheet log failed, queueing row: {err:#}");
            self.spreadsheet.enqueue(row).await;
        }
    }

    pub async fn flush_notifications(&self) -> FlushReport {
        let report = self.notifications.flush(self.email.as_ref()).await;
        self.announce(QueueName::Notifications, report);
        report
    }

    pub async fn flush_spreadsheet(&self) -> FlushReport {
        let report = self.spreadsheet.flush(self.sheet.as_ref()).await;
        self.announce(QueueName::SpreadsheetLog, report);
        report
    }

    /// Consults queued while offline go through the whole delivery path.
    pub async fn flush_consults(&self) -> FlushReport {
        let report = self.consults.flush(&FullDelivery { dispatcher: self }).await;
        self.announce(QueueName::Consults, report);
        report
    }

    pub async fn flush_all(&self) -> Vec<(QueueName, FlushReport)> {
        vec![
            (QueueName::Notifications, self.flush_notifications().await),
            (QueueName::SpreadsheetLog, self.flush_spreadsheet().await),
            (QueueName::Consults, self.flush_consults().await),
        ]
    }

    pub async fn pending(&self) -> PendingCounts {
        PendingCounts {
            notifications: self.notifications.len().await,
            spreadsheet: self.spreadsheet.len().await,
            consults: self.consults.len().await,
        }
    }

    fn announce(&self, queue: QueueName, report: FlushReport) {
        if report.skipped || report.delivered + report.retained + report.dropped == 0 {
            return;
        }
        self.events.emit(AppEvent::QueueFlushed { queue, report });
    }

    fn toast(&self, message: &str, kind: ToastKind) {
        self.events.emit(AppEvent::toast(message, kind));
    }
}

struct FullDelivery<'a> {
    dispatcher: &'a Dispatcher,
}

#[async_trait]
impl Deliver<ConsultEvent> for FullDelivery<'_> {
    async fn deliver(&self, event: &ConsultEvent) -> Result<()> {
        self.dispatcher.email.deliver(event).await?;
        self.dispatcher.record_delivery(event).await;
        Ok(())
    }
}
