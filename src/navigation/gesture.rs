use serde::Deserialize;

/// Touches must start this close to the left edge to count as a back swipe.
pub const EDGE_ZONE_PX: f64 = 50.0;
pub const MIN_TRAVEL_PX: f64 = 100.0;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct TouchPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Default)]
pub struct EdgeSwipeTracker {
    start: Option<TouchPoint>,
}

impl EdgeSwipeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch_start(&mut self, point: TouchPoint) {
        self.start = (point.x < EDGE_ZONE_PX).then_some(point);
    }

    /// True when the finished touch was a left-edge swipe to the right.
    pub fn touch_end(&mut self, point: TouchPoint) -> bool {
        let Some(start) = self.start.take() else {
            return false;
        };
        let dx = point.x - start.x;
        let dy = point.y - start.y;
        dx > MIN_TRAVEL_PX && dx > dy.abs()
    }
}
