//! Per-session video state, one named field per condition.
//!
//! Each field documents who sets it and who clears it. Pending flags are consumed with the
//! `take_*` helpers so a request is acted on exactly once.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Set by `set_vsync`; read every frame by the scheduler. Toggling it drains fences.
    pub vsync: bool,

    /// Fast-forward. Set/cleared by the frontend; forces swap interval 0 and suspends hard
    /// sync and black-frame insertion while set.
    pub nonblock: bool,

    /// Frontend is in slow motion. Suspends black-frame insertion.
    pub slow_motion: bool,

    /// Emulation paused. Suspends black-frame insertion.
    pub paused: bool,

    /// The menu owns the screen. Suspends black-frame insertion and async capture.
    pub menu_active: bool,

    /// Rewind in progress; flips `FrameDirection` to -1 until cleared.
    pub rewinding: bool,

    /// Set when the viewport or rotation changed. Cleared by the chain once every pass
    /// output size has been recomputed.
    pub resize_chain_pending: bool,

    /// Set when the source size/format changed or an allocation failed. Cleared after a
    /// successful bulk resize of the render-target pool.
    pub resize_targets_pending: bool,

    /// Set on chain build and source size change. Cleared after every history slot has
    /// been reinitialised at the new size.
    pub history_needs_init: bool,

    /// Set by a successful `HwRenderBridge::enable`; cleared by `disable` or an attachment
    /// failure. Once cleared by a failure it stays cleared for the session.
    pub hw_render_enabled: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            vsync: true,
            nonblock: false,
            slow_motion: false,
            paused: false,
            menu_active: false,
            rewinding: false,
            resize_chain_pending: true,
            resize_targets_pending: true,
            history_needs_init: true,
            hw_render_enabled: false,
        }
    }
}

impl SessionState {
    /// Source dimensions or format changed.
    pub fn source_changed(&mut self) {
        self.resize_targets_pending = true;
        self.history_needs_init = true;
    }

    pub fn viewport_changed(&mut self) {
        self.resize_chain_pending = true;
        self.resize_targets_pending = true;
    }

    pub fn take_resize_chain(&mut self) -> bool {
        std::mem::take(&mut self.resize_chain_pending)
    }

    pub fn take_resize_targets(&mut self) -> bool {
        std::mem::take(&mut self.resize_targets_pending)
    }

    pub fn take_history_init(&mut self) -> bool {
        std::mem::take(&mut self.history_needs_init)
    }

    pub fn frame_direction(&self) -> i32 {
        if self.rewinding {
            -1
        } else {
            1
        }
    }

    pub fn allows_black_frames(&self) -> bool {
        !(self.nonblock || self.slow_motion || self.paused || self.menu_active)
    }

    pub fn allows_hard_sync(&self) -> bool {
        !self.nonblock
    }

    pub fn allows_async_capture(&self) -> bool {
        !self.menu_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_flags_are_consumed_once() {
        let mut s = SessionState::default();
        assert!(s.take_resize_chain());
        assert!(!s.take_resize_chain());

        s.viewport_changed();
        assert!(s.take_resize_chain());
        assert!(s.take_resize_targets());
        assert!(s.take_history_init());
        assert!(!s.take_history_init());
    }

    #[test]
    fn black_frames_suspended_by_any_blocking_state() {
        let mut s = SessionState::default();
        assert!(s.allows_black_frames());
        s.menu_active = true;
        assert!(!s.allows_black_frames());
        assert!(!s.allows_async_capture());
        s.menu_active = false;
        s.nonblock = true;
        assert!(!s.allows_black_frames());
        assert!(!s.allows_hard_sync());
    }

    #[test]
    fn rewinding_flips_direction() {
        let mut s = SessionState::default();
        assert_eq!(s.frame_direction(), 1);
        s.rewinding = true;
        assert_eq!(s.frame_direction(), -1);
    }
}
