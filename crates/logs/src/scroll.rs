//! Follow-the-bottom tracking for a rendered log.

use std::sync::atomic::{AtomicBool, Ordering};

/// Off until the user asks to follow. A scroll event the tracker did not
/// cause itself (the user scrolling) turns following off.
#[derive(Debug, Default)]
pub struct AutoScroll {
    enabled: AtomicBool,
    scrolling_now: AtomicBool,
}

impl AutoScroll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Release);
    }

    /// Called after a batch is rendered; true means scroll to the bottom now.
    pub fn after_render(&self) -> bool {
        if self.is_enabled() {
            self.scrolling_now.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Called for every scroll event of the log container.
    pub fn on_scroll_event(&self) {
        if !self.scrolling_now.swap(false, Ordering::AcqRel) {
            self.set_enabled(false);
        }
    }

    /// The user jumped to the top.
    pub fn scroll_top(&self) {
        self.set_enabled(false);
    }

    /// Flip following; true means scroll to the bottom immediately.
    pub fn toggle(&self) -> bool {
        let on = !self.enabled.fetch_xor(true, Ordering::AcqRel);
        if on {
            self.scrolling_now.store(true, Ordering::Release);
        }
        on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_scrolls_keep_following_user_scrolls_stop_it() {
        let s = AutoScroll::new();
        assert!(!s.after_render());
        assert!(s.toggle());
        s.on_scroll_event(); // caused by toggle
        assert!(s.is_enabled());
        assert!(s.after_render());
        s.on_scroll_event(); // caused by render
        assert!(s.is_enabled());
        s.on_scroll_event(); // user
        assert!(!s.is_enabled());
    }

    #[test]
    fn scroll_top_and_toggle_off_disable() {
        let s = AutoScroll::new();
        s.toggle();
        s.scroll_top();
        assert!(!s.is_enabled());
        s.toggle();
        assert!(!s.toggle());
        assert!(!s.after_render());
    }
}
