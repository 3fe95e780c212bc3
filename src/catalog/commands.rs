use serde::Serialize;

use crate::{
    catalog::{
        contact::deep_link, CatalogOrigin, ContactChannel, ContactLink, ImageUrls, Product,
        ProductImage,
    },
    notify::{ConsultEvent, ConsultTotals, DispatchOutcome, UserInfo},
    AppState,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSummary {
    pub origin: CatalogOrigin,
    pub product_count: usize,
    pub categories: Vec<String>,
    pub show_prices: bool,
    pub language: Option<String>,
}

/// A product as the list and the detail modal render it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price_label: String,
    pub principal_image: String,
    pub images: Vec<ProductImage>,
    pub consults: ConsultTotals,
}

impl ProductView {
    fn new(product: &Product, show_prices: bool, local_consults: u32) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            category: product.category.clone(),
            price_label: product.price_label(show_prices),
            principal_image: product.principal_image.clone(),
            images: product.images.clone(),
            consults: ConsultTotals::new(product.consults, local_consults),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactReply {
    pub link: ContactLink,
    pub outcome: DispatchOutcome,
}

/// Refresh the remote config, then the product list, then restart image
/// prefetching for the new list.
pub async fn load_catalog(state: &AppState) -> Result<CatalogSummary, String> {
    let config = state.version.load_app_config().await;
    let endpoints = state.settings.endpoints();
    let version = match config.version.clone() {
        Some(version) => Some(version),
        None => state.version.cache_version().await,
    };
    let urls = ImageUrls::new(endpoints.images_base, version.as_deref());

    let origin = state.catalog.load(state.products.as_ref(), &urls).await;
    let catalog = state.catalog.current().await;
    state.preloader.resume(catalog.image_urls()).await;

    let summary = CatalogSummary {
        origin,
        product_count: catalog.len(),
        categories: catalog.categories(),
        show_prices: config.show_prices,
        language: config.language.clone(),
    };
    *state.config.write().await = config;
    Ok(summary)
}

pub async fn search(
    state: &AppState,
    query: String,
    category: Option<String>,
) -> Result<Vec<ProductView>, String> {
    let show_prices = state.config.read().await.show_prices;
    let counters = state.dispatcher.counters().all().await;
    let catalog = state.catalog.current().await;

    Ok(catalog
        .filter(&query, category.as_deref())
        .into_iter()
        .map(|product| {
            let local = counters.get(&product.id).copied().unwrap_or(0);
            ProductView::new(product, show_prices, local)
        })
        .collect())
}

/// Record the consult, then hand back the deep link. The link is returned
/// whether the notification went out or was queued.
pub async fn contact(
    state: &AppState,
    product_id: String,
    channel: ContactChannel,
) -> Result<ContactReply, String> {
    let catalog = state.catalog.current().await;
    let product = catalog
        .find(&product_id)
        .ok_or_else(|| format!("Unknown product {product_id}"))?;

    let show_prices = state.config.read().await.show_prices;
    let link = deep_link(
        channel,
        &state.settings.contact(),
        product,
        &product.price_label(show_prices),
    );

    let event = ConsultEvent::new(
        channel,
        UserInfo::current(&state.session_id),
        product,
        state.device.clone(),
    );
    let outcome = state.dispatcher.dispatch(event).await;

    Ok(ContactReply { link, outcome })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{events::AppEvent, testing::TestApp};

    #[tokio::test]
    async fn load_reports_categories_and_prices_flag() {
        let app = TestApp::new(true);
        let summary = load_catalog(&app.state).await.unwrap();

        assert_eq!(summary.origin, CatalogOrigin::Network);
        assert_eq!(summary.product_count, 2);
        assert_eq!(summary.categories, vec!["Lamps", "Tables"]);
        assert!(!summary.show_prices);
        assert_eq!(app.state.version.cache_version().await.as_deref(), Some("2.1.0"));
        app.state.preloader.stop().await;
    }

    #[tokio::test]
    async fn update_check_after_startup_load_reports_the_version() {
        let mut app = TestApp::new(true);
        load_catalog(&app.state).await.unwrap();
        app.state.preloader.stop().await;
        while app.events.try_recv().is_ok() {}

        let status = app.state.version.check_update().await;
        assert!(status.has_update);
        assert_eq!(status.new_version.as_deref(), Some("2.1.0"));

        let mut updates = 0;
        while let Ok(event) = app.events.try_recv() {
            if matches!(event, AppEvent::VersionUpdate { ref new_version, .. } if new_version == "2.1.0") {
                updates += 1;
            }
        }
        assert_eq!(updates, 1);
        assert!(app
            .state
            .db
            .kv_get("notified_2.1.0")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn search_hides_prices_and_counts_local_consults() {
        let app = TestApp::new(true);
        load_catalog(&app.state).await.unwrap();
        app.state.dispatcher.counters().increment("p-1").await;

        let views = search(&app.state, "lamp".into(), None).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].price_label, crate::catalog::PRICE_ON_REQUEST);
        assert_eq!(views[0].consults, ConsultTotals::new(4, 1));
        assert!(views[0].principal_image.ends_with("?v=210"));

        let tables = search(&app.state, String::new(), Some("Tables".into()))
            .await
            .unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].id, "p-2");
        app.state.preloader.stop().await;
    }

    #[tokio::test]
    async fn contact_returns_link_even_when_queued() {
        let app = TestApp::new(true);
        load_catalog(&app.state).await.unwrap();
        app.email.ok.store(false, Ordering::SeqCst);

        let reply = contact(&app.state, "p-1".into(), ContactChannel::Call)
            .await
            .unwrap();
        assert_eq!(reply.outcome, DispatchOutcome::Queued);
        assert_eq!(reply.link.href, "tel:+10000000000");
        assert_eq!(app.state.dispatcher.pending().await.notifications, 1);

        let err = contact(&app.state, "missing".into(), ContactChannel::Email)
            .await
            .unwrap_err();
        assert!(err.contains("missing"));
        app.state.preloader.stop().await;
    }
}
