use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::navigation::ExitCapabilities;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointSettings {
    pub config_url: String,
    pub products_url: String,
    /// Prefix every product image name is appended to.
    pub images_base: String,
    pub email_webhook: Option<String>,
    pub sheet_webhook: Option<String>,
    /// App shell files the update worker keeps an offline copy of.
    pub shell_resources: Vec<String>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        let origin = "http://localhost:8080";
        Self {
            config_url: format!("{origin}/data/config.json"),
            products_url: format!("{origin}/data/products.json"),
            images_base: format!("{origin}/data/productos/"),
            email_webhook: None,
            sheet_webhook: None,
            shell_resources: vec![
                format!("{origin}/index.html"),
                format!("{origin}/css/styles.css"),
                format!("{origin}/js/app.js"),
                format!("{origin}/manifest.json"),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContactSettings {
    pub phone: String,
    pub whatsapp: String,
    pub email: String,
    pub vendor_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppSettings {
    pub endpoints: EndpointSettings,
    pub contact: ContactSettings,
    pub exit: ExitCapabilities,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            endpoints: EndpointSettings::default(),
            contact: ContactSettings::default(),
            // A headless host can always terminate its own process.
            exit: ExitCapabilities {
                host_exit: true,
                window_close: false,
            },
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, AppSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> AppSettings {
        self.read().clone()
    }

    pub fn endpoints(&self) -> EndpointSettings {
        self.read().endpoints.clone()
    }

    pub fn contact(&self) -> ContactSettings {
        self.read().contact.clone()
    }

    pub fn exit_capabilities(&self) -> ExitCapabilities {
        self.read().exit
    }

    pub fn update(&self, settings: AppSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: AppSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }
}
