use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

use crate::{cache::ImageSource, notify::PendingCounts, AppState};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub cached_images: usize,
    pub preload_pending: usize,
    pub preloading: bool,
    pub queues: PendingCounts,
    pub online: bool,
}

pub async fn cache_stats(state: &AppState) -> Result<CacheStats, String> {
    Ok(CacheStats {
        cached_images: state.images.len().await,
        preload_pending: state.preloader.pending().await,
        preloading: state.preloader.is_running().await,
        queues: state.dispatcher.pending().await,
        online: state.lifecycle.is_online(),
    })
}

/// What the renderer puts in an `<img src>` for a resource URL.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum ResolvedImage {
    #[serde(rename_all = "camelCase")]
    Cached { data_url: String, bytes: usize },
    Placeholder { path: String },
}

fn data_url(data: &[u8]) -> String {
    let mime = image::guess_format(data)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    format!("data:{mime};base64,{}", STANDARD.encode(data))
}

pub async fn resolve_image(state: &AppState, url: String) -> Result<ResolvedImage, String> {
    if url.trim().is_empty() {
        return Err("Image url is empty".to_string());
    }
    Ok(match state.images.resolve(&url).await {
        ImageSource::Cached(blob) => ResolvedImage::Cached {
            data_url: data_url(&blob.data),
            bytes: blob.data.len(),
        },
        ImageSource::Placeholder(path) => ResolvedImage::Placeholder {
            path: path.to_string(),
        },
    })
}

/// Drops every cached image. Queues, counters and the catalog snapshot
/// are left alone.
pub async fn clear_image_cache(state: &AppState) -> Result<CacheStats, String> {
    state.images.clear().await;
    cache_stats(state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::PLACEHOLDER_IMAGE, testing::TestApp};

    #[tokio::test]
    async fn resolve_returns_cached_bytes_as_data_url() {
        let app = TestApp::new(true);
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        app.state.images.put("https://shop.test/a.png", png.clone()).await;

        let resolved = resolve_image(&app.state, "https://shop.test/a.png".into())
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedImage::Cached {
                data_url: format!("data:image/png;base64,{}", STANDARD.encode(&png)),
                bytes: 8,
            }
        );

        let missing = resolve_image(&app.state, "https://shop.test/b.png".into())
            .await
            .unwrap();
        assert_eq!(
            missing,
            ResolvedImage::Placeholder {
                path: PLACEHOLDER_IMAGE.into()
            }
        );
        assert!(resolve_image(&app.state, " ".into()).await.is_err());
    }

    #[tokio::test]
    async fn clearing_empties_the_image_cache_only() {
        let app = TestApp::new(true);
        app.state.images.put("https://shop.test/a.jpg", vec![1, 2, 3]).await;
        app.state.db.kv_set("consult_counters", "{\"p-1\":2}").await.unwrap();

        assert_eq!(cache_stats(&app.state).await.unwrap().cached_images, 1);
        let stats = clear_image_cache(&app.state).await.unwrap();
        assert_eq!(stats.cached_images, 0);
        assert!(stats.online);
        assert_eq!(app.state.dispatcher.counters().get("p-1").await, 2);
    }
}
