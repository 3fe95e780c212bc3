use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// How long the "press again to exit" window stays armed.
pub const EXIT_WINDOW: Duration = Duration::from_secs(2);
pub const EXIT_HINT: &str = "Press back again to exit";
pub const EXIT_HINT_MS: u64 = 2000;
pub const IMAGE_CLOSED: &str = "Image closed";
pub const IMAGE_CLOSED_MS: u64 = 1500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    #[default]
    List,
    Modal,
    MaximizedImage,
}

/// Where a back request came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum BackSource {
    /// The history stack was popped (browser back).
    History,
    EscapeKey,
    EdgeSwipe,
    /// The host shell's hardware or system back button.
    HostButton,
    /// An explicit close control on the viewer or the modal.
    CloseButton,
}

/// What the rendering layer reports it is currently showing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UiObservation {
    pub image_overlay_active: bool,
    pub modal_visible: bool,
}

impl UiObservation {
    pub fn level(&self) -> Level {
        if self.image_overlay_active {
            Level::MaximizedImage
        } else if self.modal_visible {
            Level::Modal
        } else {
            Level::List
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExitCapabilities {
    /// The installed-app wrapper can terminate itself.
    pub host_exit: bool,
    pub window_close: bool,
}

/// State attached to a pushed history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum HistoryMarker {
    List,
    #[serde(rename_all = "camelCase")]
    ModalOpen { product_id: String },
    #[serde(rename_all = "camelCase")]
    ImageMaximized { product_id: String, image_index: usize },
    PreventExit,
}

/// Instructions for the rendering layer, in the order they should run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NavEffect {
    PushHistory { marker: HistoryMarker },
    /// Step the history stack back to match a close that did not come from
    /// a history pop.
    ConsumeHistoryEntry,
    CloseImageViewer,
    CloseModal,
    #[serde(rename_all = "camelCase")]
    ShowToast { message: String, duration_ms: u64 },
    ExitHost,
    CloseWindow,
    /// Let the platform perform its own back navigation.
    AllowDefaultBack,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExitPath {
    HostExit,
    CloseWindow,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum BackOutcome {
    ClosedImage,
    ClosedModal,
    ExitHintShown,
    ExitRequested { path: ExitPath },
    /// No exit capability; the platform handles the back itself.
    Propagated,
    /// Dropped by the arbiter as an echo of a signal already handled.
    Debounced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub outcome: BackOutcome,
    pub effects: Vec<NavEffect>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSnapshot {
    pub level: Level,
    pub product_id: Option<String>,
    pub image_index: Option<usize>,
    pub back_press_count: u32,
}

/// The UI level is owned here and changed only at transition points.
#[derive(Debug, Clone, Default)]
pub struct NavigationState {
    level: Level,
    product_id: Option<String>,
    image_index: Option<usize>,
    back_press_count: u32,
    exit_deadline: Option<Instant>,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn snapshot(&self) -> NavigationSnapshot {
        NavigationSnapshot {
            level: self.level,
            product_id: self.product_id.clone(),
            image_index: self.image_index,
            back_press_count: self.back_press_count,
        }
    }

    pub fn open_product(&mut self, product_id: &str) -> Result<Vec<NavEffect>> {
        match self.level {
            Level::MaximizedImage => bail!("cannot open a product while an image is maximized"),
            Level::Modal => {
                // Swapping products inside an open modal keeps the same entry.
                self.product_id = Some(product_id.to_string());
                Ok(Vec::new())
            }
            Level::List => {
                self.disarm_exit();
                self.level = Level::Modal;
                self.product_id = Some(product_id.to_string());
                Ok(vec![NavEffect::PushHistory {
                    marker: HistoryMarker::ModalOpen {
                        product_id: product_id.to_string(),
                    },
                }])
            }
        }
    }

    pub fn open_image(&mut self, image_index: usize) -> Result<Vec<NavEffect>> {
        let Some(product_id) = self.product_id.clone() else {
            bail!("cannot open the image viewer without an open product");
        };

        match self.level {
            Level::List => bail!("cannot open the image viewer from the list"),
            Level::MaximizedImage => {
                self.image_index = Some(image_index);
                Ok(Vec::new())
            }
            Level::Modal => {
                self.level = Level::MaximizedImage;
                self.image_index = Some(image_index);
                Ok(vec![NavEffect::PushHistory {
                    marker: HistoryMarker::ImageMaximized {
                        product_id,
                        image_index,
                    },
                }])
            }
        }
    }

    pub fn close_image(&mut self) -> Vec<NavEffect> {
        if self.level != Level::MaximizedImage {
            return Vec::new();
        }
        self.leave_image();
        vec![NavEffect::CloseImageViewer, NavEffect::ConsumeHistoryEntry]
    }

    /// Closes the viewer instead when one is open on top of the modal.
    pub fn close_modal(&mut self) -> Vec<NavEffect> {
        match self.level {
            Level::MaximizedImage => self.close_image(),
            Level::Modal => {
                self.leave_modal();
                vec![NavEffect::CloseModal, NavEffect::ConsumeHistoryEntry]
            }
            Level::List => Vec::new(),
        }
    }

    pub fn handle_back(
        &mut self,
        source: BackSource,
        now: Instant,
        caps: ExitCapabilities,
    ) -> Transition {
        // A history pop already removed its entry; every other source must
        // step the stack back itself.
        let consume = (source != BackSource::History).then_some(NavEffect::ConsumeHistoryEntry);

        match self.level {
            Level::MaximizedImage => {
                self.leave_image();
                let mut effects = vec![
                    NavEffect::CloseImageViewer,
                    NavEffect::ShowToast {
                        message: IMAGE_CLOSED.to_string(),
                        duration_ms: IMAGE_CLOSED_MS,
                    },
                ];
                effects.extend(consume);
                Transition {
                    outcome: BackOutcome::ClosedImage,
                    effects,
                }
            }
            Level::Modal => {
                self.leave_modal();
                let mut effects = vec![NavEffect::CloseModal];
                effects.extend(consume);
                Transition {
                    outcome: BackOutcome::ClosedModal,
                    effects,
                }
            }
            Level::List => self.exit_intent(source, now, caps),
        }
    }

    fn exit_intent(&mut self, source: BackSource, now: Instant, caps: ExitCapabilities) -> Transition {
        let armed = matches!(self.exit_deadline, Some(deadline) if now < deadline);
        if !armed {
            self.back_press_count = 1;
            self.exit_deadline = Some(now + EXIT_WINDOW);
            info!("Exit hint shown; waiting for a second back press");

            let mut effects = vec![NavEffect::ShowToast {
                message: EXIT_HINT.to_string(),
                duration_ms: EXIT_HINT_MS,
            }];
            if source == BackSource::History {
                effects.push(NavEffect::PushHistory {
                    marker: HistoryMarker::PreventExit,
                });
            }
            return Transition {
                outcome: BackOutcome::ExitHintShown,
                effects,
            };
        }

        self.back_press_count += 1;
        let transition = if caps.host_exit {
            Transition {
                outcome: BackOutcome::ExitRequested {
                    path: ExitPath::HostExit,
                },
                effects: vec![NavEffect::ExitHost],
            }
        } else if caps.window_close {
            Transition {
                outcome: BackOutcome::ExitRequested {
                    path: ExitPath::CloseWindow,
                },
                effects: vec![NavEffect::CloseWindow],
            }
        } else {
            Transition {
                outcome: BackOutcome::Propagated,
                effects: vec![NavEffect::AllowDefaultBack],
            }
        };
        info!("Exit requested: {:?}", transition.outcome);
        self.disarm_exit();
        transition
    }

    /// Align the owned level with what the UI reports. Returns whether it changed.
    pub fn reconcile(&mut self, observation: UiObservation) -> bool {
        let observed = observation.level();
        if observed == self.level {
            return false;
        }

        if observed != Level::List && self.product_id.is_none() {
            warn!("UI shows {observed:?} but no product is open; keeping {:?}", self.level);
            return false;
        }

        warn!(
            "Navigation level drifted: tracked {:?}, UI shows {:?}",
            self.level, observed
        );
        match observed {
            Level::List => {
                self.leave_modal();
            }
            Level::Modal => {
                self.level = Level::Modal;
                self.image_index = None;
            }
            Level::MaximizedImage => {
                self.level = Level::MaximizedImage;
            }
        }
        true
    }

    fn leave_image(&mut self) {
        self.level = Level::Modal;
        self.image_index = None;
    }

    fn leave_modal(&mut self) {
        self.level = Level::List;
        self.product_id = None;
        self.image_index = None;
    }

    fn disarm_exit(&mut self) {
        self.back_press_count = 0;
        self.exit_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAN_EXIT: ExitCapabilities = ExitCapabilities {
        host_exit: true,
        window_close: true,
    };

    fn in_viewer() -> NavigationState {
        let mut state = NavigationState::new();
        state.open_product("p-1").unwrap();
        state.open_image(2).unwrap();
        state
    }

    #[test]
    fn opening_pushes_one_entry_per_level() {
        let mut state = NavigationState::new();
        assert_eq!(
            state.open_product("p-1").unwrap(),
            vec![NavEffect::PushHistory {
                marker: HistoryMarker::ModalOpen {
                    product_id: "p-1".into()
                }
            }]
        );
        assert_eq!(state.open_image(0).unwrap().len(), 1);
        assert_eq!(state.level(), Level::MaximizedImage);

        // Carousel navigation inside the viewer does not push again.
        assert!(state.open_image(1).unwrap().is_empty());
        assert_eq!(state.snapshot().image_index, Some(1));
    }

    #[test]
    fn viewer_cannot_open_from_list() {
        let mut state = NavigationState::new();
        assert!(state.open_image(0).is_err());
        assert_eq!(state.level(), Level::List);
    }

    #[test]
    fn back_closes_image_then_modal() {
        let mut state = in_viewer();
        let now = Instant::now();

        let first = state.handle_back(BackSource::History, now, CAN_EXIT);
        assert_eq!(first.outcome, BackOutcome::ClosedImage);
        assert_eq!(state.level(), Level::Modal);
        assert!(!first.effects.contains(&NavEffect::ConsumeHistoryEntry));

        let second = state.handle_back(BackSource::History, now, CAN_EXIT);
        assert_eq!(second.outcome, BackOutcome::ClosedModal);
        assert_eq!(state.level(), Level::List);
        assert_eq!(state.snapshot().product_id, None);
    }

    #[test]
    fn non_history_back_consumes_an_entry() {
        let mut state = in_viewer();
        let transition = state.handle_back(BackSource::EscapeKey, Instant::now(), CAN_EXIT);
        assert_eq!(
            transition.effects.last(),
            Some(&NavEffect::ConsumeHistoryEntry)
        );
    }

    #[test]
    fn close_modal_closes_viewer_first() {
        let mut state = in_viewer();
        assert_eq!(
            state.close_modal(),
            vec![NavEffect::CloseImageViewer, NavEffect::ConsumeHistoryEntry]
        );
        assert_eq!(state.level(), Level::Modal);
        assert_eq!(
            state.close_modal(),
            vec![NavEffect::CloseModal, NavEffect::ConsumeHistoryEntry]
        );
        assert!(state.close_modal().is_empty());
    }

    #[test]
    fn second_back_inside_window_exits() {
        let mut state = NavigationState::new();
        let start = Instant::now();

        let first = state.handle_back(BackSource::History, start, CAN_EXIT);
        assert_eq!(first.outcome, BackOutcome::ExitHintShown);
        assert_eq!(state.snapshot().back_press_count, 1);
        assert!(first.effects.contains(&NavEffect::PushHistory {
            marker: HistoryMarker::PreventExit
        }));

        let second = state.handle_back(
            BackSource::History,
            start + Duration::from_millis(1500),
            CAN_EXIT,
        );
        assert_eq!(
            second.outcome,
            BackOutcome::ExitRequested {
                path: ExitPath::HostExit
            }
        );
        assert_eq!(second.effects, vec![NavEffect::ExitHost]);
    }

    #[test]
    fn back_after_window_restarts_count() {
        let mut state = NavigationState::new();
        let start = Instant::now();

        state.handle_back(BackSource::HostButton, start, CAN_EXIT);
        let late = state.handle_back(BackSource::HostButton, start + EXIT_WINDOW, CAN_EXIT);

        assert_eq!(late.outcome, BackOutcome::ExitHintShown);
        assert_eq!(state.snapshot().back_press_count, 1);
    }

    #[test]
    fn exit_falls_back_through_capabilities() {
        let start = Instant::now();
        let later = start + Duration::from_millis(100);

        let mut state = NavigationState::new();
        let window_only = ExitCapabilities {
            host_exit: false,
            window_close: true,
        };
        state.handle_back(BackSource::EscapeKey, start, window_only);
        assert_eq!(
            state.handle_back(BackSource::EscapeKey, later, window_only).effects,
            vec![NavEffect::CloseWindow]
        );

        let mut state = NavigationState::new();
        state.handle_back(BackSource::EscapeKey, start, ExitCapabilities::default());
        let last = state.handle_back(BackSource::EscapeKey, later, ExitCapabilities::default());
        assert_eq!(last.outcome, BackOutcome::Propagated);
        assert_eq!(last.effects, vec![NavEffect::AllowDefaultBack]);
    }

    #[test]
    fn opening_a_product_disarms_exit() {
        let mut state = NavigationState::new();
        let start = Instant::now();
        state.handle_back(BackSource::History, start, CAN_EXIT);
        state.open_product("p-1").unwrap();
        state.close_modal();

        let next = state.handle_back(BackSource::History, start + Duration::from_millis(200), CAN_EXIT);
        assert_eq!(next.outcome, BackOutcome::ExitHintShown);
    }

    #[test]
    fn reconcile_adopts_observed_level() {
        let mut state = in_viewer();
        assert!(!state.reconcile(UiObservation {
            image_overlay_active: true,
            modal_visible: true,
        }));

        assert!(state.reconcile(UiObservation {
            image_overlay_active: false,
            modal_visible: true,
        }));
        assert_eq!(state.level(), Level::Modal);
        assert_eq!(state.snapshot().product_id.as_deref(), Some("p-1"));

        assert!(state.reconcile(UiObservation::default()));
        assert_eq!(state.level(), Level::List);
    }

    #[test]
    fn reconcile_keeps_list_when_no_product_is_open() {
        let mut state = NavigationState::default();
        assert!(!state.reconcile(UiObservation {
            image_overlay_active: true,
            modal_visible: false,
        }));
        assert!(!state.reconcile(UiObservation {
            image_overlay_active: false,
            modal_visible: true,
        }));

        let snapshot = state.snapshot();
        assert_eq!(state.level(), Level::List);
        assert_eq!(snapshot.product_id, None);
        assert_eq!(snapshot.image_index, None);
    }

    #[test]
    fn effects_serialize_with_kind_tags() {
        let json = serde_json::to_value(NavEffect::PushHistory {
            marker: HistoryMarker::ImageMaximized {
                product_id: "p-1".into(),
                image_index: 3,
            },
        })
        .unwrap();
        assert_eq!(json["kind"], "pushHistory");
        assert_eq!(json["marker"]["state"], "imageMaximized");
        assert_eq!(json["marker"]["imageIndex"], 3);
    }
}
