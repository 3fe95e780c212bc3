//! Product records as the rendering layer sees them.

pub mod commands;
pub mod contact;
pub mod source;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use crate::{cache::PLACEHOLDER_IMAGE, db::Database};

pub use contact::{ContactChannel, ContactLink};
pub use source::{HttpProductSource, ProductSource};

pub const CATALOG_CACHE_KEY: &str = "catalog_cache";
pub const DEFAULT_VERSION: &str = "1.0.0";
pub const PRICE_ON_REQUEST: &str = "Price on request";

/// One entry of the product document. Field names of the published
/// document are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProduct {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "descripcion")]
    pub description: String,
    #[serde(default, alias = "categoria")]
    pub category: String,
    #[serde(default, alias = "precioMin")]
    pub price_min: f64,
    #[serde(default, alias = "precioMax")]
    pub price_max: f64,
    #[serde(default, alias = "imagenes")]
    pub images: Vec<RawImage>,
    #[serde(default, alias = "consultas")]
    pub consults: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawImage {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub id: Option<String>,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(default)]
    pub principal: bool,
    #[serde(default = "first_position", alias = "orden")]
    pub order: u32,
}

fn first_position() -> u32 {
    1
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::Text(text) => text,
            StringOrNumber::Number(number) => number.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<StringOrNumber>::deserialize(deserializer).map(|value| value.map(String::from))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub id: String,
    pub url: String,
    pub name: String,
    pub principal: bool,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price_min: f64,
    pub price_max: f64,
    pub images: Vec<ProductImage>,
    pub principal_image: String,
    /// Consult count published in the product document.
    pub consults: u32,
}

/// Builds versioned image URLs under a base path.
#[derive(Debug, Clone)]
pub struct ImageUrls {
    base: String,
    version: String,
}

impl ImageUrls {
    pub fn new(base: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            base: base.into(),
            version: version.unwrap_or(DEFAULT_VERSION).to_string(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn build(&self, image_name: &str) -> String {
        if image_name.is_empty() {
            return PLACEHOLDER_IMAGE.to_string();
        }
        format!(
            "{}{}?v={}",
            self.base,
            sanitize_image_name(image_name),
            self.version.replace('.', "")
        )
    }
}

/// Keeps ASCII letters, digits, underscore, whitespace, dots and dashes.
pub fn sanitize_image_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '.' | '-'))
        .collect()
}

pub fn format_price(min: f64, max: f64) -> String {
    if min == max {
        format!("${min:.2}")
    } else {
        format!("${min:.2} - ${max:.2}")
    }
}

impl Product {
    pub fn from_raw(raw: RawProduct, urls: &ImageUrls) -> Self {
        let mut images: Vec<ProductImage> = raw
            .images
            .iter()
            .map(|image| ProductImage {
                id: image.id.clone().unwrap_or_else(|| image.name.clone()),
                url: urls.build(&image.name),
                name: image.name.clone(),
                principal: image.principal,
                order: image.order,
            })
            .collect();

        if images.is_empty() {
            images.push(ProductImage {
                id: format!("{}_1", raw.id),
                url: PLACEHOLDER_IMAGE.to_string(),
                name: "placeholder.jpg".to_string(),
                principal: true,
                order: 1,
            });
        }

        let principal_image = images
            .iter()
            .find(|image| image.principal)
            .or_else(|| images.first())
            .map(|image| image.url.clone())
            .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string());

        Self {
            id: raw.id,
            name: raw.name,
            description: raw.description,
            category: raw.category,
            price_min: raw.price_min,
            price_max: raw.price_max,
            images,
            principal_image,
            consults: raw.consults,
        }
    }

    pub fn price_label(&self, show_prices: bool) -> String {
        if show_prices {
            format_price(self.price_min, self.price_max)
        } else {
            PRICE_ON_REQUEST.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    pub fn from_raw(raw: Vec<RawProduct>, urls: &ImageUrls) -> Self {
        Self::new(raw.into_iter().map(|p| Product::from_raw(p, urls)).collect())
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|product| product.id == id)
    }

    /// Distinct categories, sorted without regard to case.
    pub fn categories(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut categories: Vec<String> = self
            .products
            .iter()
            .filter(|product| seen.insert(product.category.as_str()))
            .map(|product| product.category.clone())
            .collect();
        categories.sort_by_key(|category| category.to_lowercase());
        categories
    }

    pub fn filter(&self, query: &str, category: Option<&str>) -> Vec<&Product> {
        let needle = query.trim().to_lowercase();
        self.products
            .iter()
            .filter(|product| {
                needle.is_empty()
                    || product.name.to_lowercase().contains(&needle)
                    || product.description.to_lowercase().contains(&needle)
            })
            .filter(|product| category.map_or(true, |category| product.category == category))
            .collect()
    }

    /// Every distinct real image URL, principal images first.
    pub fn image_urls(&self) -> Vec<String> {
        let principals = self.products.iter().map(|p| p.principal_image.clone());
        let rest = self
            .products
            .iter()
            .flat_map(|p| p.images.iter().map(|image| image.url.clone()));

        let mut seen = HashSet::new();
        principals
            .chain(rest)
            .filter(|url| !url.contains("placeholder"))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogSnapshot {
    products: Vec<Product>,
    saved_at: DateTime<Utc>,
}

/// Where the current catalog came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CatalogOrigin {
    Network,
    Snapshot,
    Empty,
}

/// Holds the loaded catalog and keeps its offline snapshot current.
pub struct CatalogStore {
    db: Database,
    current: RwLock<Catalog>,
}

impl CatalogStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            current: RwLock::new(Catalog::default()),
        }
    }

    pub async fn current(&self) -> Catalog {
        self.current.read().await.clone()
    }

    /// Fetch the product document; fall back to the last snapshot when the
    /// network load fails.
    pub async fn load(&self, source: &dyn ProductSource, urls: &ImageUrls) -> CatalogOrigin {
        let (catalog, origin) = match source.fetch_products(urls.version()).await {
            Ok(raw) => {
                let catalog = Catalog::from_raw(raw, urls);
                self.save_snapshot(&catalog).await;
                (catalog, CatalogOrigin::Network)
            }
            Err(err) => {
                warn!("Failed to load products: {err:#}");
                match self.load_snapshot().await {
                    Some(catalog) => (catalog, CatalogOrigin::Snapshot),
                    None => (Catalog::default(), CatalogOrigin::Empty),
                }
            }
        };

        info!("Catalog ready with {} products ({origin:?})", catalog.len());
        *self.current.write().await = catalog;
        origin
    }

    async fn save_snapshot(&self, catalog: &Catalog) {
        let snapshot = CatalogSnapshot {
            products: catalog.products.clone(),
            saved_at: Utc::now(),
        };
        if let Err(err) = self.db.kv_set_json(CATALOG_CACHE_KEY, &snapshot).await {
            warn!("Failed to save catalog snapshot: {err:#}");
        }
    }

    pub async fn load_snapshot(&self) -> Option<Catalog> {
        match self.db.kv_get_json::<CatalogSnapshot>(CATALOG_CACHE_KEY).await {
            Ok(Some(snapshot)) => {
                info!("Loaded catalog snapshot from {}", snapshot.saved_at);
                Some(Catalog::new(snapshot.products))
            }
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to read catalog snapshot: {err:#}");
                None
            }
        }
    }
}
