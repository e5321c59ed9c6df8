//! Interop with hardware-rendered cores.
//!
//! The bridge owns the render target a core draws into and mediates who may issue draw
//! calls on a shared graphics context. Ownership only changes through `bind_for_core` and
//! `bind_for_frontend`.

use scanline_core::{
    AttachmentHandle, ContextOwner, DrawTarget, EngineError, GraphicsApi, PixelFormat,
    ProgramHandle, SessionState, ShaderSource, Size, TextureDesc, TextureHandle, VideoBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRenderRequest {
    pub max_width: u32,
    pub max_height: u32,
    pub depth: bool,
    pub stencil: bool,
}

/// Fixed-size description handed to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRenderInterface {
    pub api: GraphicsApi,
    pub version: (u32, u32),
    pub device: usize,
    pub context: usize,
    /// Core and frontend share one context; the core must draw only between
    /// `bind_for_core` and `bind_for_frontend`.
    pub shared_context: bool,
    pub max_size: Size,
    pub target: TextureHandle,
    pub depth: bool,
    pub stencil: bool,
}

#[derive(Debug)]
struct HwTarget {
    texture: TextureHandle,
    size: Size,
    attachment: Option<AttachmentHandle>,
    request: HwRenderRequest,
}

#[derive(Debug, Default)]
pub struct HwRenderBridge {
    target: Option<HwTarget>,
    owner: ContextOwner,
    disabled_for_session: bool,
    /// Programs the core compiled through the bridge; destroyed on disable.
    programs: Vec<ProgramHandle>,
}

impl HwRenderBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the core's render target (clamped to device limits) and its optional
    /// depth/stencil attachment. Returns the allocated size.
    ///
    /// A failure to create the target or its attachment disables hardware rendering for
    /// the rest of the session; later calls return [`EngineError::Unsupported`].
    pub fn enable(
        &mut self,
        backend: &mut dyn VideoBackend,
        request: HwRenderRequest,
        state: &mut SessionState,
    ) -> Result<Size, EngineError> {
        if self.disabled_for_session {
            return Err(EngineError::Unsupported(
                "hardware rendering disabled for this session",
            ));
        }
        self.release(backend);

        let caps = backend.caps();
        let mut limit = caps.max_texture_size;
        if request.depth || request.stencil {
            limit = limit.min(caps.max_renderbuffer_size);
        }
        let size = Size::new(request.max_width.min(limit), request.max_height.min(limit));
        if size.width != request.max_width || size.height != request.max_height {
            tracing::warn!(
                requested_w = request.max_width,
                requested_h = request.max_height,
                width = size.width,
                height = size.height,
                "hardware render target exceeds device limits; clamped"
            );
        }

        let desc = TextureDesc::render_target(size, PixelFormat::Rgba8Unorm, "hw render target");
        let texture = match backend.create_texture(&desc) {
            Ok(t) => t,
            Err(e) => {
                self.disabled_for_session = true;
                state.hw_render_enabled = false;
                tracing::warn!(
                    error = %e,
                    "hardware render target allocation failed; hardware rendering disabled for this session"
                );
                return Err(e);
            }
        };
        backend.clear(
            DrawTarget::Texture { texture, size },
            [0.0, 0.0, 0.0, 1.0],
        );

        let attachment = if request.depth || request.stencil {
            match attach(backend, texture, size, request.stencil) {
                Ok(a) => Some(a),
                Err(e) => {
                    backend.destroy_texture(texture);
                    self.disabled_for_session = true;
                    state.hw_render_enabled = false;
                    tracing::warn!(
                        error = %e,
                        "depth/stencil attachment failed; hardware rendering disabled for this session"
                    );
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.target = Some(HwTarget {
            texture,
            size,
            attachment,
            request,
        });
        state.hw_render_enabled = true;
        tracing::info!(
            width = size.width,
            height = size.height,
            depth = request.depth,
            stencil = request.stencil,
            "hardware rendering enabled"
        );
        Ok(size)
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_disabled_for_session(&self) -> bool {
        self.disabled_for_session
    }

    pub fn owner(&self) -> ContextOwner {
        self.owner
    }

    pub fn get_interface(&self, backend: &dyn VideoBackend) -> Option<HwRenderInterface> {
        let target = self.target.as_ref()?;
        let handles = backend.native_handles();
        Some(HwRenderInterface {
            api: handles.api,
            version: handles.version,
            device: handles.device,
            context: handles.context,
            shared_context: backend.caps().shared_hw_context,
            max_size: target.size,
            target: target.texture,
            depth: target.request.depth,
            stencil: target.request.stencil,
        })
    }

    /// Hand the context to the core for its render callback.
    pub fn bind_for_core(&mut self, backend: &mut dyn VideoBackend) -> Result<(), EngineError> {
        if self.target.is_none() {
            return Err(EngineError::ContextOwnership(
                "bind_for_core without hardware rendering enabled",
            ));
        }
        if self.owner == ContextOwner::Core {
            return Err(EngineError::ContextOwnership("core already owns the context"));
        }
        self.owner = ContextOwner::Core;
        if backend.caps().shared_hw_context {
            backend.bind_hw_context(ContextOwner::Core);
        }
        Ok(())
    }

    /// Take the context back for frontend drawing. No-op when the frontend already owns it.
    pub fn bind_for_frontend(&mut self, backend: &mut dyn VideoBackend) {
        if self.owner == ContextOwner::Frontend {
            return;
        }
        self.owner = ContextOwner::Frontend;
        if backend.caps().shared_hw_context {
            backend.bind_hw_context(ContextOwner::Frontend);
        }
    }

    /// Fails while the core owns the context.
    pub fn ensure_frontend(&self) -> Result<(), EngineError> {
        match self.owner {
            ContextOwner::Frontend => Ok(()),
            ContextOwner::Core => Err(EngineError::ContextOwnership(
                "frontend draw while the core owns the context",
            )),
        }
    }

    /// The region of the target the core drew this frame, clamped to the target.
    pub fn frame_source(&self, size: Size) -> Option<(TextureHandle, Size)> {
        let target = self.target.as_ref()?;
        let clamped = Size::new(
            size.width.min(target.size.width),
            size.height.min(target.size.height),
        );
        if clamped != size {
            tracing::debug!(
                width = size.width,
                height = size.height,
                "core frame larger than its render target; clamped"
            );
        }
        Some((target.texture, clamped))
    }

    /// Compile/link entry point for the core. Only valid inside the core's bind window.
    pub fn compile_program(
        &mut self,
        backend: &mut dyn VideoBackend,
        source: &ShaderSource,
    ) -> Result<ProgramHandle, EngineError> {
        if self.owner != ContextOwner::Core {
            return Err(EngineError::ContextOwnership(
                "core compile outside bind_for_core",
            ));
        }
        let program = backend.compile_program(source)?;
        self.programs.push(program);
        Ok(program)
    }

    pub fn disable(&mut self, backend: &mut dyn VideoBackend, state: &mut SessionState) {
        self.release(backend);
        state.hw_render_enabled = false;
    }

    fn release(&mut self, backend: &mut dyn VideoBackend) {
        self.bind_for_frontend(backend);
        for program in self.programs.drain(..) {
            backend.destroy_program(program);
        }
        if let Some(target) = self.target.take() {
            if let Some(a) = target.attachment {
                backend.destroy_depth_stencil(a);
            }
            backend.destroy_texture(target.texture);
        }
    }
}

fn attach(
    backend: &mut dyn VideoBackend,
    texture: TextureHandle,
    size: Size,
    stencil: bool,
) -> Result<AttachmentHandle, EngineError> {
    let attachment = backend.create_depth_stencil(size, stencil)?;
    if let Err(e) = backend.attach_depth_stencil(texture, attachment) {
        backend.destroy_depth_stencil(attachment);
        return Err(e);
    }
    Ok(attachment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanline_runtime_headless::HeadlessBackend;

    fn request(w: u32, h: u32, depth: bool) -> HwRenderRequest {
        HwRenderRequest {
            max_width: w,
            max_height: h,
            depth,
            stencil: depth,
        }
    }

    #[test]
    fn oversized_request_is_clamped_not_failed() {
        let mut gpu = HeadlessBackend::new();
        gpu.caps_mut().max_texture_size = 2048;
        let mut state = SessionState::default();
        let mut hw = HwRenderBridge::new();

        let size = hw
            .enable(&mut gpu, request(4096, 4096, false), &mut state)
            .expect("clamped enable");
        assert_eq!(size, Size::new(2048, 2048));
        assert!(state.hw_render_enabled);

        let iface = hw.get_interface(&gpu).expect("interface");
        assert_eq!(iface.max_size, Size::new(2048, 2048));
        assert_eq!(gpu.texture_size(iface.target), Some(Size::new(2048, 2048)));
    }

    #[test]
    fn depth_stencil_is_attached_to_target() {
        let mut gpu = HeadlessBackend::new();
        let mut state = SessionState::default();
        let mut hw = HwRenderBridge::new();
        hw.enable(&mut gpu, request(640, 480, true), &mut state)
            .expect("enable");
        let iface = hw.get_interface(&gpu).expect("interface");
        assert!(gpu.attached_depth_stencil(iface.target).is_some());

        hw.disable(&mut gpu, &mut state);
        assert_eq!(gpu.live_attachment_count(), 0);
        assert_eq!(gpu.live_texture_count(), 0);
        assert!(!state.hw_render_enabled);
    }

    #[test]
    fn attachment_failure_disables_for_session() {
        let mut gpu = HeadlessBackend::new();
        gpu.faults.attachments = true;
        let mut state = SessionState::default();
        let mut hw = HwRenderBridge::new();

        let err = hw
            .enable(&mut gpu, request(640, 480, true), &mut state)
            .expect_err("attachment fails");
        assert!(!err.is_fatal());
        assert!(hw.is_disabled_for_session());
        assert_eq!(gpu.live_texture_count(), 0);

        gpu.faults.attachments = false;
        assert!(matches!(
            hw.enable(&mut gpu, request(640, 480, false), &mut state),
            Err(EngineError::Unsupported(_))
        ));
    }

    #[test]
    fn target_allocation_failure_disables_for_session() {
        let mut gpu = HeadlessBackend::new();
        gpu.faults.texture_allocations = 1;
        let mut state = SessionState::default();
        let mut hw = HwRenderBridge::new();

        let err = hw
            .enable(&mut gpu, request(640, 480, false), &mut state)
            .expect_err("target allocation fails");
        assert!(err.is_allocation(), "got {err:?}");
        assert!(hw.is_disabled_for_session());
        assert!(!state.hw_render_enabled);
        assert!(hw.frame_source(Size::new(640, 480)).is_none());

        // The fault is spent, yet the session stays on the software path.
        assert!(matches!(
            hw.enable(&mut gpu, request(640, 480, false), &mut state),
            Err(EngineError::Unsupported(_))
        ));
        assert_eq!(gpu.live_texture_count(), 0);
    }

    #[test]
    fn context_ownership_is_explicit() {
        let mut gpu = HeadlessBackend::new();
        let mut state = SessionState::default();
        let mut hw = HwRenderBridge::new();
        assert!(hw.bind_for_core(&mut gpu).is_err(), "not enabled yet");

        hw.enable(&mut gpu, request(320, 240, false), &mut state)
            .expect("enable");
        let src = ShaderSource {
            vert: "v".into(),
            frag: "f".into(),
            origin: None,
        };
        assert!(hw.compile_program(&mut gpu, &src).is_err());

        hw.bind_for_core(&mut gpu).expect("core bind");
        assert_eq!(gpu.context_owner(), ContextOwner::Core);
        assert!(hw.ensure_frontend().is_err());
        assert!(hw.bind_for_core(&mut gpu).is_err(), "double bind");
        hw.compile_program(&mut gpu, &src).expect("compile in bind window");

        hw.bind_for_frontend(&mut gpu);
        hw.bind_for_frontend(&mut gpu);
        assert_eq!(gpu.context_owner(), ContextOwner::Frontend);
        assert!(hw.ensure_frontend().is_ok());
    }

    #[test]
    fn frame_source_is_clamped_to_target() {
        let mut gpu = HeadlessBackend::new();
        let mut state = SessionState::default();
        let mut hw = HwRenderBridge::new();
        assert!(hw.frame_source(Size::new(1, 1)).is_none());
        hw.enable(&mut gpu, request(320, 240, false), &mut state)
            .expect("enable");
        let (_, size) = hw.frame_source(Size::new(400, 200)).expect("source");
        assert_eq!(size, Size::new(320, 200));
    }
}
