use gpui::{Bounds, Pixels, point, px};
use gpui_component::VirtualListScrollHandle;

/// Max-offset drift below which a bottom scroll counts as settled.
const SCROLL_SETTLE_EPSILON: Pixels = px(1.);

/// Pins the message list to its newest row after every feed update.
///
/// Row heights are measured a frame after the rows arrive, so a single scroll
/// request is re-applied until the list's max offset stops moving.
pub struct ScrollManager {
    scroll_handle: VirtualListScrollHandle,
    pending_scroll_to_bottom: bool,
    last_applied_max_offset: Option<Pixels>,
}

impl ScrollManager {
    pub fn new() -> Self {
        Self {
            scroll_handle: VirtualListScrollHandle::new(),
            pending_scroll_to_bottom: false,
            last_applied_max_offset: None,
        }
    }

    pub fn handle(&self) -> &VirtualListScrollHandle {
        &self.scroll_handle
    }

    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
        self.last_applied_max_offset = None;
    }

    pub fn has_pending_scroll(&self) -> bool {
        self.pending_scroll_to_bottom
    }

    /// Scrolls to the tail if a request is pending. Returns whether the
    /// request is still open and wants another frame.
    pub fn apply_pending_scroll(&mut self) -> bool {
        if !self.pending_scroll_to_bottom {
            return false;
        }

        let max_offset = self.scroll_handle.max_offset().height;
        let current_x = self.scroll_handle.offset().x;
        // GPUI scrolls down with negative Y offsets.
        let target_y = if max_offset > Pixels::ZERO {
            -max_offset
        } else {
            Pixels::ZERO
        };
        self.scroll_handle.set_offset(point(current_x, target_y));

        if scroll_settled(self.last_applied_max_offset, max_offset) {
            self.pending_scroll_to_bottom = false;
            self.last_applied_max_offset = None;
        } else {
            self.last_applied_max_offset = Some(max_offset);
        }
        self.pending_scroll_to_bottom
    }

    pub fn bounds(&self) -> Bounds<Pixels> {
        self.scroll_handle.bounds()
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new()
    }
}

fn scroll_settled(previous: Option<Pixels>, current: Pixels) -> bool {
    previous.is_some_and(|previous| (previous - current).abs() <= SCROLL_SETTLE_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_application_never_settles() {
        assert!(!scroll_settled(None, px(0.)));
        assert!(!scroll_settled(None, px(480.)));
    }

    #[test]
    fn settles_once_max_offset_stops_moving() {
        assert!(!scroll_settled(Some(px(200.)), px(480.)));
        assert!(scroll_settled(Some(px(480.)), px(480.)));
        assert!(scroll_settled(Some(px(480.)), px(480.5)));
    }
}
