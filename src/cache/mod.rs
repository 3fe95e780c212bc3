//! Local object cache: resource URL → binary payload, stored in SQLite.
//!
//! Every operation is best effort. Storage failures are logged and read
//! as "absent"; nothing here returns an error to the caller.

pub mod commands;
pub mod fetch;
pub mod preloader;

use log::{debug, warn};

use crate::db::{CachedBlob, Database};

pub use fetch::{Fetch, HttpFetcher};
pub use preloader::{ImagePreloader, PreloadQueue};

pub const PLACEHOLDER_IMAGE: &str = "./images/placeholder.jpg";

const IMAGE_NAMESPACE: &str = "image:";

#[derive(Clone)]
pub struct ImageCache {
    db: Database,
    namespace: String,
}

/// What the renderer should show for an image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Cached(CachedBlob),
    Placeholder(&'static str),
}

impl ImageCache {
    pub fn new(db: Database) -> Self {
        Self::namespaced(db, IMAGE_NAMESPACE)
    }

    /// A view over the same store whose keys live under `namespace`.
    pub fn namespaced(db: Database, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    pub async fn put(&self, key: &str, data: Vec<u8>) {
        let size = data.len();
        match self.db.blob_put(&self.storage_key(key), data).await {
            Ok(()) => debug!("Cached {size} bytes for {key}"),
            Err(err) => warn!("Failed to store {key} in image cache: {err:#}"),
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedBlob> {
        match self.db.blob_get(&self.storage_key(key)).await {
            Ok(Some(mut blob)) => {
                blob.key = key.to_string();
                Some(blob)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to read {key} from image cache: {err:#}");
                None
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    pub async fn clear(&self) {
        match self.db.blob_clear(&self.namespace).await {
            Ok(removed) => debug!("Image cache cleared ({removed} entries)"),
            Err(err) => warn!("Failed to clear image cache: {err:#}"),
        }
    }

    pub async fn len(&self) -> usize {
        self.db.blob_count(&self.namespace).await.unwrap_or_else(|err| {
            warn!("Failed to count image cache entries: {err:#}");
            0
        })
    }

    /// Cached copy when present, the placeholder asset otherwise.
    pub async fn resolve(&self, url: &str) -> ImageSource {
        match self.get(url).await {
            Some(blob) => ImageSource::Cached(blob),
            None => ImageSource::Placeholder(PLACEHOLDER_IMAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ImageCache {
        ImageCache::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let cache = cache();
        cache.put("https://cdn/p1.jpg", vec![0xFF, 0xD8, 0xFF]).await;

        let blob = cache.get("https://cdn/p1.jpg").await.unwrap();
        assert_eq!(blob.key, "https://cdn/p1.jpg");
        assert_eq!(blob.data, vec![0xFF, 0xD8, 0xFF]);
        assert!(cache.exists("https://cdn/p1.jpg").await);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = cache();
        cache.put("k", vec![1]).await;
        cache.put("k", vec![2]).await;

        assert_eq!(cache.get("k").await.unwrap().data, vec![2]);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn missing_key_is_absent() {
        let cache = cache();
        assert!(cache.get("nope").await.is_none());
        assert!(!cache.exists("nope").await);
        assert_eq!(
            cache.resolve("nope").await,
            ImageSource::Placeholder(PLACEHOLDER_IMAGE)
        );
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = cache();
        cache.put("a", vec![1]).await;
        cache.put("b", vec![2]).await;
        cache.clear().await;

        assert_eq!(cache.len().await, 0);
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn namespaces_do_not_see_each_other() {
        let db = Database::open_in_memory().unwrap();
        let images = ImageCache::new(db.clone());
        let shell = ImageCache::namespaced(db, "shell/");

        shell.put("./index.html", b"<html>".to_vec()).await;
        assert!(!images.exists("./index.html").await);
        assert_eq!(shell.get("./index.html").await.unwrap().key, "./index.html");

        images.put("x", vec![1]).await;
        images.clear().await;
        assert_eq!(images.len().await, 0);
        assert_eq!(shell.len().await, 1);
    }

    #[tokio::test]
    async fn backend_failures_read_as_absent() {
        let db = Database::open_in_memory().unwrap();
        let cache = ImageCache::new(db.clone());
        cache.put("k", vec![1]).await;

        db.execute(|conn| {
            conn.execute_batch("DROP TABLE image_cache")?;
            Ok(())
        })
        .await
        .unwrap();

        cache.put("k", vec![2]).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.len().await, 0);
        cache.clear().await;
    }
}
