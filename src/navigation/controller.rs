use std::{sync::Arc, time::Instant};

use anyhow::Result;
use tokio::sync::Mutex;

use crate::events::{AppEvent, EventSink};

use super::{
    arbiter::BackArbiter,
    gesture::{EdgeSwipeTracker, TouchPoint},
    BackOutcome, BackSource, ExitCapabilities, Level, NavEffect, NavigationSnapshot,
    NavigationState, UiObservation,
};

struct NavInner {
    state: NavigationState,
    arbiter: BackArbiter,
    swipe: EdgeSwipeTracker,
}

#[derive(Clone)]
pub struct NavigationController {
    inner: Arc<Mutex<NavInner>>,
    events: Arc<dyn EventSink>,
    caps: ExitCapabilities,
}

// Read through tokio's clock so paused-time tests drive the exit window.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl NavigationController {
    pub fn new(events: Arc<dyn EventSink>, caps: ExitCapabilities) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NavInner {
                state: NavigationState::new(),
                arbiter: BackArbiter::new(),
                swipe: EdgeSwipeTracker::new(),
            })),
            events,
            caps,
        }
    }

    pub async fn snapshot(&self) -> NavigationSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    pub async fn open_product(&self, product_id: &str) -> Result<NavigationSnapshot> {
        let mut inner = self.inner.lock().await;
        let before = inner.state.level();
        let effects = inner.state.open_product(product_id)?;
        let snapshot = inner.state.snapshot();
        drop(inner);

        self.publish(before, effects, &snapshot);
        Ok(snapshot)
    }

    pub async fn open_image(&self, image_index: usize) -> Result<NavigationSnapshot> {
        let mut inner = self.inner.lock().await;
        let before = inner.state.level();
        let effects = inner.state.open_image(image_index)?;
        let snapshot = inner.state.snapshot();
        drop(inner);

        self.publish(before, effects, &snapshot);
        Ok(snapshot)
    }

    pub async fn close_image(&self) -> NavigationSnapshot {
        self.close_with(NavigationState::close_image).await
    }

    pub async fn close_modal(&self) -> NavigationSnapshot {
        self.close_with(NavigationState::close_modal).await
    }

    async fn close_with(&self, close: fn(&mut NavigationState) -> Vec<NavEffect>) -> NavigationSnapshot {
        let mut inner = self.inner.lock().await;
        let before = inner.state.level();
        let effects = close(&mut inner.state);
        if !effects.is_empty() {
            inner.arbiter.record(BackSource::CloseButton, now());
        }
        let snapshot = inner.state.snapshot();
        drop(inner);

        self.publish(before, effects, &snapshot);
        snapshot
    }

    pub async fn back(&self, source: BackSource) -> BackOutcome {
        let mut inner = self.inner.lock().await;
        self.back_locked(&mut inner, source)
    }

    fn back_locked(&self, inner: &mut NavInner, source: BackSource) -> BackOutcome {
        let at = now();
        if !inner.arbiter.admit(source, at) {
            return BackOutcome::Debounced;
        }

        let before = inner.state.level();
        let transition = inner.state.handle_back(source, at, self.caps);
        let snapshot = inner.state.snapshot();
        self.publish(before, transition.effects, &snapshot);
        transition.outcome
    }

    pub async fn touch_start(&self, point: TouchPoint) {
        self.inner.lock().await.swipe.touch_start(point);
    }

    /// Finishes a touch; a recognised edge swipe is handled as a back signal.
    pub async fn touch_end(&self, point: TouchPoint) -> Option<BackOutcome> {
        let mut inner = self.inner.lock().await;
        if !inner.swipe.touch_end(point) {
            return None;
        }
        Some(self.back_locked(&mut inner, BackSource::EdgeSwipe))
    }

    pub async fn observe(&self, observation: UiObservation) -> NavigationSnapshot {
        let mut inner = self.inner.lock().await;
        let before = inner.state.level();
        inner.state.reconcile(observation);
        let snapshot = inner.state.snapshot();
        drop(inner);

        self.publish(before, Vec::new(), &snapshot);
        snapshot
    }

    fn publish(&self, before: Level, effects: Vec<NavEffect>, snapshot: &NavigationSnapshot) {
        for effect in effects {
            self.events.emit(AppEvent::Navigation { effect });
        }
        if before != snapshot.level {
            self.events.emit(AppEvent::NavigationStateChanged {
                level: snapshot.level,
                product_id: snapshot.product_id.clone(),
            });
        }
    }
}
