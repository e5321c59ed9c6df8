//! Presentation pacing: swap interval, frame-latency waits, hard sync and black frames.
//
// end_frame order:
// 1) present with the effective interval (tearing flag only for interval 0 on a tearing surface)
// 2) latency 0: explicit wait-for-vblank
// 3) black-frame insertion (N extra black presents) unless suspended
// 4) hard sync: enqueue a fence, retire the oldest until at most `hard_sync_frames` remain

use std::collections::VecDeque;
use std::time::Duration;

use scanline_core::{
    BackendCaps, DrawTarget, EngineError, FenceHandle, SessionState, Size, SurfaceMode,
    VideoBackend, VideoSettings, Viewport, WaitStatus,
};

/// Upper bound on queued fences regardless of `hard_sync_frames`.
pub const MAX_FENCES: usize = 8;

/// Bound on every fence and frame-latency wait.
pub const GPU_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentConfig {
    pub vsync: bool,
    /// Requested interval in vblanks (1..=4).
    pub swap_interval: u32,
    pub adaptive_vsync: bool,
    /// `0` means latency 1 plus an explicit wait-for-vblank after each present.
    pub max_frame_latency: u32,
    /// `Some(n)`: let the CPU run at most `n` frames ahead of the GPU.
    pub hard_sync_frames: Option<u32>,
    pub black_frame_insertion: u32,
    /// Ask for a waitable (frame-latency-limited) flip surface.
    pub waitable: bool,
}

impl PresentConfig {
    pub fn from_settings(s: &VideoSettings) -> Self {
        Self {
            vsync: s.vsync,
            swap_interval: s.swap_interval,
            adaptive_vsync: s.adaptive_vsync,
            max_frame_latency: s.max_frame_latency,
            hard_sync_frames: s.hard_sync.then_some(s.hard_sync_frames),
            black_frame_insertion: s.black_frame_insertion,
            waitable: s.waitable_swapchain,
        }
    }
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self::from_settings(&VideoSettings::default())
    }
}

/// What the scheduler last applied to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainState {
    pub vsync: bool,
    /// Effective interval: `0` off, `-1` adaptive, otherwise vblanks per present.
    pub swap_interval: i32,
    pub adaptive: bool,
    pub max_frame_latency: u32,
    /// Oldest first.
    pub outstanding_fences: VecDeque<FenceHandle>,
}

#[derive(Debug)]
pub struct PresentationScheduler {
    config: PresentConfig,
    swapchain: SwapchainState,
    nonblock: bool,
    surface: Option<(Size, SurfaceMode)>,
    /// The preferred mode failed once; stay on the fallback for the session.
    flip_failed: bool,
}

impl PresentationScheduler {
    pub fn new(config: PresentConfig) -> Self {
        Self {
            config,
            swapchain: SwapchainState {
                vsync: config.vsync,
                swap_interval: 0,
                adaptive: config.adaptive_vsync,
                max_frame_latency: config.max_frame_latency,
                outstanding_fences: VecDeque::with_capacity(MAX_FENCES),
            },
            nonblock: false,
            surface: None,
            flip_failed: false,
        }
    }

    /// Store `config` and apply its interval and latency to the backend.
    ///
    /// Fences queued under the previous hard-sync bound are retired down to the new one;
    /// turning hard sync off drains them all.
    pub fn configure(
        &mut self,
        backend: &mut dyn VideoBackend,
        config: PresentConfig,
    ) -> Result<(), EngineError> {
        self.config = config;
        self.swapchain.vsync = config.vsync;
        self.swapchain.adaptive = config.adaptive_vsync;
        self.swapchain.max_frame_latency = config.max_frame_latency;
        self.apply_interval(backend);
        self.apply_latency(backend);
        match config.hard_sync_frames {
            None => self.drain_fences(backend),
            Some(frames) => self.retire_fences(backend, frames as usize),
        }
    }

    pub fn config(&self) -> PresentConfig {
        self.config
    }

    pub fn swapchain(&self) -> &SwapchainState {
        &self.swapchain
    }

    pub fn swap_interval(&self) -> i32 {
        self.swapchain.swap_interval
    }

    pub fn outstanding_fences(&self) -> usize {
        self.swapchain.outstanding_fences.len()
    }

    pub fn surface_mode(&self) -> Option<SurfaceMode> {
        self.surface.map(|(_, mode)| mode)
    }

    pub fn is_nonblock(&self) -> bool {
        self.nonblock
    }

    /// Interval the backend should present with right now.
    pub fn effective_interval(&self, caps: &BackendCaps) -> i32 {
        if self.nonblock || !self.swapchain.vsync {
            return 0;
        }
        let interval = self.config.swap_interval.max(1) as i32;
        if self.config.adaptive_vsync && interval == 1 && caps.adaptive_vsync {
            -1
        } else {
            interval
        }
    }

    fn apply_interval(&mut self, backend: &mut dyn VideoBackend) {
        let interval = self.effective_interval(&backend.caps());
        self.swapchain.swap_interval = interval;
        backend.set_swap_interval(interval);
        tracing::debug!(interval, "swap interval applied");
    }

    fn apply_latency(&mut self, backend: &mut dyn VideoBackend) {
        let requested = self.config.max_frame_latency.max(1);
        match backend.set_max_frame_latency(requested) {
            Ok(granted) => tracing::debug!(requested, granted, "frame latency limit applied"),
            Err(EngineError::Unsupported(_)) => {
                tracing::debug!("frame latency limiting unsupported; pacing relies on fences")
            }
            Err(e) => tracing::warn!(error = %e, "failed to set frame latency limit"),
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Surface
    // ---------------------------------------------------------------------------------------------

    pub fn create_surface(
        &mut self,
        backend: &mut dyn VideoBackend,
        size: Size,
    ) -> Result<SurfaceMode, EngineError> {
        self.open_surface(backend, size, false)
    }

    /// Resize with the currently configured tearing/latency flags. Same fallback rules as
    /// `create_surface`.
    pub fn resize_surface(
        &mut self,
        backend: &mut dyn VideoBackend,
        size: Size,
    ) -> Result<SurfaceMode, EngineError> {
        self.open_surface(backend, size, true)
    }

    fn preferred_mode(&self, caps: &BackendCaps) -> SurfaceMode {
        if self.flip_failed || !caps.flip_model {
            return SurfaceMode::Legacy;
        }
        SurfaceMode::Flip {
            allow_tearing: caps.tearing,
            waitable: caps.frame_latency_wait && self.config.waitable,
        }
    }

    fn open_surface(
        &mut self,
        backend: &mut dyn VideoBackend,
        size: Size,
        resize: bool,
    ) -> Result<SurfaceMode, EngineError> {
        let preferred = self.preferred_mode(&backend.caps());
        let mode = match attempt_surface(backend, size, preferred, resize) {
            Ok(()) => preferred,
            Err(e) if preferred != SurfaceMode::Legacy => {
                tracing::warn!(
                    error = %e,
                    ?preferred,
                    "presentation mode unavailable; retrying with legacy mode"
                );
                self.flip_failed = true;
                attempt_surface(backend, size, SurfaceMode::Legacy, resize).map_err(surface_fatal)?;
                SurfaceMode::Legacy
            }
            Err(e) => return Err(surface_fatal(e)),
        };

        self.surface = Some((size, mode));
        tracing::info!(
            ?mode,
            width = size.width,
            height = size.height,
            resize,
            "presentation surface ready"
        );
        // Interval and latency belong to the surface; reapply after every (re)creation.
        self.apply_interval(backend);
        self.apply_latency(backend);
        Ok(mode)
    }

    // ---------------------------------------------------------------------------------------------
    // Per-frame
    // ---------------------------------------------------------------------------------------------

    /// Block on the frame-latency primitive when the surface has one. A timeout is logged
    /// and the frame continues.
    pub fn begin_frame(&mut self, backend: &mut dyn VideoBackend) {
        if !self.surface.is_some_and(|(_, m)| m.is_waitable()) {
            return;
        }
        if backend.wait_frame_latency(GPU_WAIT_TIMEOUT) == WaitStatus::TimedOut {
            tracing::warn!(timeout = ?GPU_WAIT_TIMEOUT, "frame latency wait timed out");
        }
    }

    /// Present the frame, then apply vblank wait, black frames and hard sync. On return at
    /// most `hard_sync_frames` fences are outstanding.
    pub fn end_frame(
        &mut self,
        backend: &mut dyn VideoBackend,
        session: &SessionState,
    ) -> Result<(), EngineError> {
        let tearing = self.swapchain.swap_interval == 0
            && self.surface.is_some_and(|(_, m)| m.allows_tearing());
        backend.present(tearing)?;

        if self.config.max_frame_latency == 0 && self.swapchain.vsync && !self.nonblock {
            backend.wait_for_vblank();
        }

        if self.config.black_frame_insertion > 0 && session.allows_black_frames() {
            let viewport = self
                .surface
                .map(|(size, _)| Viewport::from_size(size))
                .unwrap_or_default();
            for _ in 0..self.config.black_frame_insertion {
                backend.clear(DrawTarget::Backbuffer(viewport), [0.0, 0.0, 0.0, 1.0]);
                backend.present(tearing)?;
            }
        }

        if let Some(limit) = self.config.hard_sync_frames {
            if session.allows_hard_sync() && !self.nonblock && backend.caps().fences {
                self.fence_iterate(backend, limit as usize)?;
            }
        }
        Ok(())
    }

    fn fence_iterate(
        &mut self,
        backend: &mut dyn VideoBackend,
        limit: usize,
    ) -> Result<(), EngineError> {
        if self.swapchain.outstanding_fences.len() < MAX_FENCES {
            let fence = backend.insert_fence()?;
            self.swapchain.outstanding_fences.push_back(fence);
        }
        self.retire_fences(backend, limit)
    }

    /// Wait on the oldest fences until at most `limit` remain.
    fn retire_fences(
        &mut self,
        backend: &mut dyn VideoBackend,
        limit: usize,
    ) -> Result<(), EngineError> {
        let queue = &mut self.swapchain.outstanding_fences;
        while queue.len() > limit {
            let Some(fence) = queue.pop_front() else {
                break;
            };
            let status = backend.wait_fence(fence, GPU_WAIT_TIMEOUT);
            backend.destroy_fence(fence);
            if status == WaitStatus::TimedOut {
                return Err(EngineError::GpuTimeout {
                    what: "hard-sync fence",
                    timeout: GPU_WAIT_TIMEOUT,
                });
            }
        }
        Ok(())
    }

    /// Wait for and retire every outstanding fence.
    pub fn drain_fences(&mut self, backend: &mut dyn VideoBackend) -> Result<(), EngineError> {
        let mut timed_out = false;
        while let Some(fence) = self.swapchain.outstanding_fences.pop_front() {
            if backend.wait_fence(fence, GPU_WAIT_TIMEOUT) == WaitStatus::TimedOut {
                timed_out = true;
            }
            backend.destroy_fence(fence);
        }
        if timed_out {
            return Err(EngineError::GpuTimeout {
                what: "fence drain",
                timeout: GPU_WAIT_TIMEOUT,
            });
        }
        Ok(())
    }

    /// Toggle vsync mid-session: fences are drained and the interval reapplied. The chain
    /// is not touched.
    pub fn set_vsync(&mut self, backend: &mut dyn VideoBackend, on: bool) -> Result<(), EngineError> {
        self.swapchain.vsync = on;
        let drained = self.drain_fences(backend);
        self.apply_interval(backend);
        drained
    }

    /// Enter or leave fast-forward.
    pub fn set_nonblock(
        &mut self,
        backend: &mut dyn VideoBackend,
        on: bool,
    ) -> Result<(), EngineError> {
        if self.nonblock == on {
            return Ok(());
        }
        self.nonblock = on;
        let drained = self.drain_fences(backend);
        self.apply_interval(backend);
        drained
    }

    /// Destroy outstanding fences without waiting (teardown).
    pub fn release(&mut self, backend: &mut dyn VideoBackend) {
        for fence in self.swapchain.outstanding_fences.drain(..) {
            backend.destroy_fence(fence);
        }
    }
}

fn attempt_surface(
    backend: &mut dyn VideoBackend,
    size: Size,
    mode: SurfaceMode,
    resize: bool,
) -> Result<(), EngineError> {
    if resize {
        backend.resize_surface(size, mode)
    } else {
        backend.create_surface(size, mode)
    }
}

fn surface_fatal(e: EngineError) -> EngineError {
    match e {
        EngineError::SurfaceCreation(_) => e,
        other => EngineError::SurfaceCreation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanline_runtime_headless::HeadlessBackend;

    const SIZE: Size = Size::new(1280, 720);

    fn scheduler(gpu: &mut HeadlessBackend, config: PresentConfig) -> PresentationScheduler {
        let mut s = PresentationScheduler::new(config);
        s.create_surface(gpu, SIZE).expect("surface");
        s
    }

    #[test]
    fn adaptive_vsync_requests_negative_interval() {
        let mut gpu = HeadlessBackend::new();
        let s = scheduler(
            &mut gpu,
            PresentConfig {
                adaptive_vsync: true,
                ..PresentConfig::default()
            },
        );
        assert_eq!(s.swap_interval(), -1);
        assert_eq!(gpu.swap_interval(), -1);

        gpu.caps_mut().adaptive_vsync = false;
        let s = scheduler(
            &mut gpu,
            PresentConfig {
                adaptive_vsync: true,
                ..PresentConfig::default()
            },
        );
        assert_eq!(s.swap_interval(), 1);

        let s = scheduler(
            &mut gpu,
            PresentConfig {
                adaptive_vsync: true,
                swap_interval: 2,
                ..PresentConfig::default()
            },
        );
        assert_eq!(s.swap_interval(), 2, "adaptive applies to interval 1 only");
    }

    #[test]
    fn nonblock_forces_interval_zero_with_tearing() {
        let mut gpu = HeadlessBackend::new();
        let mut s = scheduler(&mut gpu, PresentConfig::default());
        s.set_nonblock(&mut gpu, true).expect("nonblock");
        assert_eq!(gpu.swap_interval(), 0);

        s.end_frame(&mut gpu, &SessionState::default()).expect("present");
        let p = gpu.presents().last().copied().expect("present recorded");
        assert_eq!(p.swap_interval, 0);
        assert!(p.allow_tearing);

        s.set_nonblock(&mut gpu, false).expect("leave nonblock");
        assert_eq!(gpu.swap_interval(), 1);
    }

    #[test]
    fn hard_sync_bounds_outstanding_fences() {
        let mut gpu = HeadlessBackend::new();
        for limit in 0..=3u32 {
            let mut s = scheduler(
                &mut gpu,
                PresentConfig {
                    hard_sync_frames: Some(limit),
                    ..PresentConfig::default()
                },
            );
            for _ in 0..12 {
                s.end_frame(&mut gpu, &SessionState::default())
                    .expect("end frame");
                assert!(s.outstanding_fences() <= limit as usize);
            }
            s.release(&mut gpu);
        }
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn reconfigure_retires_fences_to_new_bound() {
        let mut gpu = HeadlessBackend::new();
        let hard_sync = |frames| PresentConfig {
            hard_sync_frames: Some(frames),
            ..PresentConfig::default()
        };
        let mut s = scheduler(&mut gpu, hard_sync(3));
        for _ in 0..5 {
            s.end_frame(&mut gpu, &SessionState::default())
                .expect("end frame");
        }
        assert_eq!(s.outstanding_fences(), 3);

        s.configure(&mut gpu, hard_sync(1)).expect("tighten");
        assert_eq!(s.outstanding_fences(), 1);

        s.configure(&mut gpu, PresentConfig::default())
            .expect("hard sync off");
        assert_eq!(s.outstanding_fences(), 0);
        assert_eq!(gpu.live_fence_count(), 0);

        // Nothing is queued while hard sync stays off.
        s.end_frame(&mut gpu, &SessionState::default())
            .expect("end frame");
        assert_eq!(s.outstanding_fences(), 0);
    }

    #[test]
    fn hung_fence_is_fatal() {
        let mut gpu = HeadlessBackend::new();
        let mut s = scheduler(
            &mut gpu,
            PresentConfig {
                hard_sync_frames: Some(0),
                ..PresentConfig::default()
            },
        );
        gpu.faults.hung_fences = true;
        let err = s
            .end_frame(&mut gpu, &SessionState::default())
            .expect_err("timeout");
        assert!(err.is_fatal());
        assert!(matches!(err, EngineError::GpuTimeout { .. }));
    }

    #[test]
    fn hard_sync_suspended_in_fast_forward() {
        let mut gpu = HeadlessBackend::new();
        let mut s = scheduler(
            &mut gpu,
            PresentConfig {
                hard_sync_frames: Some(1),
                ..PresentConfig::default()
            },
        );
        s.set_nonblock(&mut gpu, true).expect("nonblock");
        s.end_frame(&mut gpu, &SessionState::default()).expect("end");
        assert_eq!(s.outstanding_fences(), 0);
        assert_eq!(gpu.fence_waits(), 0);
    }

    #[test]
    fn black_frames_follow_real_frame_unless_menu() {
        let mut gpu = HeadlessBackend::new();
        let mut s = scheduler(
            &mut gpu,
            PresentConfig {
                black_frame_insertion: 2,
                ..PresentConfig::default()
            },
        );
        let mut session = SessionState::default();
        s.end_frame(&mut gpu, &session).expect("end");
        assert_eq!(gpu.presents().len(), 3);
        assert!(gpu.presents()[1..].iter().all(|p| p.marker == 0));

        session.menu_active = true;
        s.end_frame(&mut gpu, &session).expect("end");
        assert_eq!(gpu.presents().len(), 4);
    }

    #[test]
    fn zero_latency_waits_for_vblank() {
        let mut gpu = HeadlessBackend::new();
        let mut s = scheduler(
            &mut gpu,
            PresentConfig {
                max_frame_latency: 0,
                ..PresentConfig::default()
            },
        );
        assert_eq!(gpu.max_frame_latency(), Some(1));
        s.end_frame(&mut gpu, &SessionState::default()).expect("end");
        assert_eq!(gpu.vblank_waits(), 1);
    }

    #[test]
    fn flip_failure_falls_back_once_then_sticks() {
        let mut gpu = HeadlessBackend::new();
        gpu.faults.flip_surface = true;
        let mut s = PresentationScheduler::new(PresentConfig::default());
        assert_eq!(s.create_surface(&mut gpu, SIZE).expect("fallback"), SurfaceMode::Legacy);

        gpu.faults.flip_surface = false;
        assert_eq!(
            s.resize_surface(&mut gpu, Size::new(800, 600)).expect("resize"),
            SurfaceMode::Legacy
        );
    }

    #[test]
    fn fallback_failure_is_fatal() {
        let mut gpu = HeadlessBackend::new();
        gpu.faults.all_surfaces = true;
        let err = PresentationScheduler::new(PresentConfig::default())
            .create_surface(&mut gpu, SIZE)
            .expect_err("must fail");
        assert!(err.is_fatal());
    }

    #[test]
    fn waitable_surface_waits_each_frame() {
        let mut gpu = HeadlessBackend::new();
        let mut s = scheduler(
            &mut gpu,
            PresentConfig {
                waitable: true,
                ..PresentConfig::default()
            },
        );
        assert!(s.surface_mode().is_some_and(|m| m.is_waitable()));
        gpu.faults.hung_latency_wait = true;
        s.begin_frame(&mut gpu);
        s.begin_frame(&mut gpu);
        assert_eq!(gpu.latency_waits(), 2);
    }
}
