use crate::{
    navigation::{BackOutcome, BackSource, NavigationSnapshot, TouchPoint, UiObservation},
    AppState,
};

pub async fn get_navigation_state(state: &AppState) -> Result<NavigationSnapshot, String> {
    Ok(state.navigation.snapshot().await)
}

pub async fn open_product(state: &AppState, product_id: String) -> Result<NavigationSnapshot, String> {
    if state.catalog.current().await.find(&product_id).is_none() {
        return Err(format!("Unknown product {product_id}"));
    }
    state
        .navigation
        .open_product(&product_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn open_image(state: &AppState, image_index: usize) -> Result<NavigationSnapshot, String> {
    state
        .navigation
        .open_image(image_index)
        .await
        .map_err(|e| e.to_string())
}

pub async fn close_image(state: &AppState) -> Result<NavigationSnapshot, String> {
    Ok(state.navigation.close_image().await)
}

pub async fn close_modal(state: &AppState) -> Result<NavigationSnapshot, String> {
    Ok(state.navigation.close_modal().await)
}

pub async fn back(state: &AppState, source: BackSource) -> Result<BackOutcome, String> {
    Ok(state.navigation.back(source).await)
}

pub async fn touch_start(state: &AppState, point: TouchPoint) -> Result<(), String> {
    state.navigation.touch_start(point).await;
    Ok(())
}

pub async fn touch_end(state: &AppState, point: TouchPoint) -> Result<Option<BackOutcome>, String> {
    Ok(state.navigation.touch_end(point).await)
}

pub async fn observe(state: &AppState, observation: UiObservation) -> Result<NavigationSnapshot, String> {
    Ok(state.navigation.observe(observation).await)
}
