use std::time::{Duration, Instant};

use log::debug;

use super::BackSource;

/// A signal from another source this soon after an accepted one is the
/// same user action arriving twice (e.g. Escape followed by the popstate
/// its own history step produces).
pub const ECHO_WINDOW: Duration = Duration::from_millis(250);
pub const SWIPE_LOCK: Duration = Duration::from_millis(500);

/// Single gate every back signal passes through before reaching the
/// navigation state.
#[derive(Debug, Default)]
pub struct BackArbiter {
    last_accepted: Option<(BackSource, Instant)>,
    last_swipe: Option<Instant>,
}

impl BackArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, source: BackSource, now: Instant) -> bool {
        if source == BackSource::EdgeSwipe {
            if let Some(at) = self.last_swipe {
                if now.saturating_duration_since(at) < SWIPE_LOCK {
                    debug!("Edge swipe ignored inside swipe lock");
                    return false;
                }
            }
        }

        if let Some((last, at)) = self.last_accepted {
            if last != source && now.saturating_duration_since(at) < ECHO_WINDOW {
                debug!("{source:?} ignored as echo of {last:?}");
                return false;
            }
        }

        self.record(source, now);
        true
    }

    /// Register a close that bypassed `admit` so its history echo is caught.
    pub fn record(&mut self, source: BackSource, now: Instant) {
        self.last_accepted = Some((source, now));
        if source == BackSource::EdgeSwipe {
            self.last_swipe = Some(now);
        }
    }
}
