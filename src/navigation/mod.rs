//! List → product modal → maximized image, and what "back" closes.

pub mod arbiter;
pub mod commands;
pub mod controller;
pub mod gesture;
pub mod state;

pub use controller::NavigationController;
pub use gesture::TouchPoint;
pub use state::{
    BackOutcome, BackSource, ExitCapabilities, ExitPath, HistoryMarker, Level, NavEffect,
    NavigationSnapshot, NavigationState, UiObservation,
};
