//! Per-frame orchestration of chain, scheduler, readback and hardware-render interop.
//
// Frame order:
// 1) the frontend must own the context; wait on the frame-latency primitive
// 2) bind the frame source (upload, hardware target, or the previous frame for a dup)
// 3) run the chain; composite its texture output into the viewport if it did not
//    draw straight into the backbuffer
// 4) overlays, async capture, then present and pace

use std::path::{Path, PathBuf};

use scanline_buffers::{CaptureStatus, ReadbackPipeline, ScratchBufferRing};
use scanline_core::{
    ortho_mvp, BoundTexture, BoundUniform, DrawTarget, EngineError, FilterMode, Geometry,
    ImageData, PassDraw, PixelFormat, ProgramHandle, Rotation, SessionState, ShaderSource, Size,
    TextureHandle, UniformValue, VideoBackend, VideoSettings, Viewport, WrapMode,
};
use scanline_preset::Preset;

use crate::chain::{ChainOptions, ChainOutput, FilterChain};
use crate::compiler::stock_shader;
use crate::context_cache::ContextCache;
use crate::hw_render::{HwRenderBridge, HwRenderInterface, HwRenderRequest};
use crate::present::{PresentConfig, PresentationScheduler};
use crate::Collaborators;

/// The image a core produced this frame.
#[derive(Debug, Clone, Copy)]
pub enum Frame<'a> {
    /// Software-rendered pixels.
    Pixels(ImageData<'a>),
    /// The core drew `size` pixels into the hardware-render target.
    Hardware { size: Size },
    /// Re-present the previous frame.
    Dup,
}

/// A textured quad drawn over the chain output. `rect` is `[x, y, w, h]` in viewport
/// coordinates normalized to `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub texture: TextureHandle,
    pub rect: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing was presented (allocation failure or no source yet); the next frame retries.
    Dropped,
}

#[derive(Debug)]
pub struct Pipeline<B: VideoBackend> {
    backend: B,
    settings: VideoSettings,
    session: SessionState,
    chain: FilterChain,
    scheduler: PresentationScheduler,
    readback: ReadbackPipeline,
    scratch: ScratchBufferRing,
    hw: HwRenderBridge,
    collab: Collaborators,
    composite: ProgramHandle,
    surface_size: Size,
    viewport: Viewport,
    frame_count: u64,
}

impl<B: VideoBackend> Pipeline<B> {
    /// Open the presentation surface and build the chain named by `settings.shader_preset`
    /// (stock when unset or rejected).
    pub fn new(
        mut backend: B,
        settings: VideoSettings,
        surface_size: Size,
        collab: Collaborators,
    ) -> Result<Self, EngineError> {
        settings
            .validate()
            .map_err(|msg| EngineError::InvalidConfig {
                path: PathBuf::from("<video settings>"),
                msg,
            })?;

        let mut scheduler = PresentationScheduler::new(PresentConfig::from_settings(&settings));
        scheduler.create_surface(&mut backend, surface_size)?;

        let mut session = SessionState {
            vsync: settings.vsync,
            ..SessionState::default()
        };
        let options = chain_options(&settings);
        let preset = load_preset(&collab, settings.shader_preset.as_deref());
        let mut chain = FilterChain::build_or_stock(&mut backend, preset.as_ref(), options, &collab)?;
        let viewport = Viewport::from_size(surface_size);
        chain.set_viewport(viewport, &mut session);

        let composite = collab
            .compiler
            .compile(&mut backend, 0, &stock_shader(), Some("composite"))?
            .program;

        tracing::info!(
            backend = backend.name(),
            width = surface_size.width,
            height = surface_size.height,
            stock = chain.is_stock(),
            "video pipeline ready"
        );
        Ok(Self {
            backend,
            readback: ReadbackPipeline::new(settings.readback_slots),
            scratch: ScratchBufferRing::new(settings.scratch_buffers),
            settings,
            session,
            chain,
            scheduler,
            hw: HwRenderBridge::new(),
            collab,
            composite,
            surface_size,
            viewport,
            frame_count: 0,
        })
    }

    /// `new`, reusing a backend left in `cache` by an earlier `shutdown` instead of calling
    /// `create`.
    pub fn with_cache(
        cache: &mut ContextCache<B>,
        create: impl FnOnce() -> Result<B, EngineError>,
        settings: VideoSettings,
        surface_size: Size,
        collab: Collaborators,
    ) -> Result<Self, EngineError> {
        let backend = match cache.take() {
            Some(backend) => {
                tracing::info!(backend = backend.name(), "reusing cached video context");
                backend
            }
            None => create()?,
        };
        Self::new(backend, settings, surface_size, collab)
    }

    // ---------------------------------------------------------------------------------------------
    // Controls
    // ---------------------------------------------------------------------------------------------

    /// Swap the filter chain. A preset that fails to load or build leaves the stock chain.
    pub fn set_shader_preset(&mut self, path: Option<&Path>) -> Result<(), EngineError> {
        // The old chain's targets may still be referenced by queued GPU work.
        self.scheduler.drain_fences(&mut self.backend)?;
        self.chain.release(&mut self.backend);

        let preset = load_preset(&self.collab, path);
        self.chain = FilterChain::build_or_stock(
            &mut self.backend,
            preset.as_ref(),
            chain_options(&self.settings),
            &self.collab,
        )?;
        self.settings.shader_preset = path.map(Path::to_path_buf);
        self.session.resize_chain_pending = true;
        self.session.resize_targets_pending = true;
        self.session.history_needs_init = true;
        self.chain.set_viewport(self.viewport, &mut self.session);
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.chain.set_viewport(viewport, &mut self.session);
    }

    /// Resize the presentation surface and place the image at `viewport` inside it.
    pub fn resize(&mut self, surface_size: Size, viewport: Viewport) -> Result<(), EngineError> {
        self.scheduler.resize_surface(&mut self.backend, surface_size)?;
        self.surface_size = surface_size;
        self.set_viewport(viewport);
        Ok(())
    }

    /// Toggle vsync without rebuilding the chain.
    pub fn set_vsync(&mut self, on: bool) -> Result<(), EngineError> {
        self.session.vsync = on;
        self.settings.vsync = on;
        self.scheduler.set_vsync(&mut self.backend, on)
    }

    /// Change the hard-sync bound mid-session. Fences beyond the new bound are retired
    /// immediately.
    pub fn set_hard_sync(&mut self, on: bool, frames: u32) -> Result<(), EngineError> {
        let settings = VideoSettings {
            hard_sync: on,
            hard_sync_frames: frames,
            ..self.settings.clone()
        };
        settings.validate().map_err(EngineError::other)?;
        self.settings = settings;
        self.scheduler
            .configure(&mut self.backend, PresentConfig::from_settings(&self.settings))
    }

    pub fn set_nonblock(&mut self, on: bool) -> Result<(), EngineError> {
        self.session.nonblock = on;
        self.scheduler.set_nonblock(&mut self.backend, on)
    }

    pub fn set_menu_active(&mut self, on: bool) {
        self.session.menu_active = on;
    }

    pub fn set_rewinding(&mut self, on: bool) {
        self.session.rewinding = on;
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.settings.rotation = rotation;
        self.chain.set_rotation(rotation, &mut self.session);
    }

    pub fn set_parameter(&mut self, name: &str, value: f32) -> bool {
        self.chain.set_parameter(name, value)
    }

    // ---------------------------------------------------------------------------------------------
    // Frame
    // ---------------------------------------------------------------------------------------------

    pub fn frame(
        &mut self,
        frame: Frame<'_>,
        overlays: &[Overlay],
    ) -> Result<FrameOutcome, EngineError> {
        self.hw.ensure_frontend()?;
        self.scheduler.begin_frame(&mut self.backend);
        self.backend.clear(
            DrawTarget::Backbuffer(Viewport::from_size(self.surface_size)),
            [0.0, 0.0, 0.0, 1.0],
        );

        match frame {
            Frame::Pixels(image) => {
                if let Err(e) = self
                    .chain
                    .upload_input(&mut self.backend, &image, &mut self.session)
                {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, frame = self.frame_count, "frame upload failed; dropping frame");
                    return Ok(FrameOutcome::Dropped);
                }
            }
            Frame::Hardware { size } => {
                let (texture, size) = self.hw.frame_source(size).ok_or(EngineError::Unsupported(
                    "hardware frame without an enabled render target",
                ))?;
                self.chain.set_input_source(
                    texture,
                    size,
                    PixelFormat::Rgba8Unorm,
                    &mut self.session,
                );
            }
            Frame::Dup => {}
        }

        self.chain
            .set_frame_context(self.frame_count, self.session.frame_direction());
        match self
            .chain
            .execute(&mut self.backend, self.viewport, &mut self.session)?
        {
            ChainOutput::Backbuffer => {}
            ChainOutput::Texture { texture, .. } => self.composite(texture)?,
            ChainOutput::Dropped => {
                tracing::debug!(frame = self.frame_count, "chain produced no image");
                return Ok(FrameOutcome::Dropped);
            }
        }

        for overlay in overlays {
            self.draw_overlay(overlay)?;
        }

        if self.settings.gpu_record && self.session.allows_async_capture() {
            if let Err(e) =
                self.readback
                    .capture_async_begin(&mut self.backend, self.viewport, self.frame_count)
            {
                tracing::warn!(error = %e, frame = self.frame_count, "async capture failed");
            }
        }

        self.scheduler.end_frame(&mut self.backend, &self.session)?;
        self.frame_count += 1;
        Ok(FrameOutcome::Presented)
    }

    fn composite(&mut self, texture: TextureHandle) -> Result<(), EngineError> {
        let textures = [BoundTexture {
            binding: 0,
            name: "Source".into(),
            texture,
            filter: default_filter(&self.settings),
            wrap: WrapMode::ClampToEdge,
            mipmap: false,
        }];
        let uniforms = [BoundUniform {
            name: "MVP".into(),
            value: UniformValue::Mat4(ortho_mvp(self.settings.rotation)),
        }];
        self.backend.draw(&PassDraw {
            program: self.composite,
            target: DrawTarget::Backbuffer(self.viewport),
            textures: &textures,
            uniforms: &uniforms,
            geometry: Geometry::FullscreenQuad,
            clear: None,
            blend: false,
        })
    }

    fn draw_overlay(&mut self, overlay: &Overlay) -> Result<(), EngineError> {
        let [x, y, w, h] = overlay.rect;
        let vertices: [f32; 16] = [
            x, y, 0.0, 0.0, //
            x + w, y, 1.0, 0.0, //
            x, y + h, 0.0, 1.0, //
            x + w, y + h, 1.0, 1.0, //
        ];
        let bytes: Vec<u8> = vertices.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let scratch = self.scratch.acquire(&mut self.backend, &bytes)?;

        let textures = [BoundTexture {
            binding: 0,
            name: "Source".into(),
            texture: overlay.texture,
            filter: FilterMode::Linear,
            wrap: WrapMode::ClampToEdge,
            mipmap: false,
        }];
        let uniforms = [BoundUniform {
            name: "MVP".into(),
            value: UniformValue::Mat4(ortho_mvp(Rotation::Deg0)),
        }];
        self.backend.draw(&PassDraw {
            program: self.composite,
            target: DrawTarget::Backbuffer(self.viewport),
            textures: &textures,
            uniforms: &uniforms,
            geometry: Geometry::Buffer {
                buffer: scratch.buffer,
                vertex_count: 4,
            },
            clear: None,
            blend: true,
        })
    }

    // ---------------------------------------------------------------------------------------------
    // Capture
    // ---------------------------------------------------------------------------------------------

    /// Blocking copy of the presented viewport (RGBA8, tightly packed).
    pub fn screenshot(&mut self, dst: &mut Vec<u8>) -> Result<Size, EngineError> {
        self.hw.ensure_frontend()?;
        self.readback
            .capture_sync(&mut self.backend, self.viewport, dst)
    }

    /// Oldest finished async capture, if any. Never blocks.
    pub fn try_take_capture(&mut self, dst: &mut Vec<u8>) -> Result<CaptureStatus, EngineError> {
        self.readback.capture_async_try_consume(&mut self.backend, dst)
    }

    // ---------------------------------------------------------------------------------------------
    // Hardware rendering
    // ---------------------------------------------------------------------------------------------

    pub fn enable_hw_render(&mut self, request: HwRenderRequest) -> Result<Size, EngineError> {
        self.hw.enable(&mut self.backend, request, &mut self.session)
    }

    pub fn hw_interface(&self) -> Option<HwRenderInterface> {
        self.hw.get_interface(&self.backend)
    }

    pub fn bind_hw_for_core(&mut self) -> Result<(), EngineError> {
        self.hw.bind_for_core(&mut self.backend)
    }

    pub fn bind_hw_for_frontend(&mut self) {
        self.hw.bind_for_frontend(&mut self.backend);
    }

    pub fn hw_compile_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle, EngineError> {
        self.hw.compile_program(&mut self.backend, source)
    }

    pub fn disable_hw_render(&mut self) {
        self.hw.disable(&mut self.backend, &mut self.session);
    }

    // ---------------------------------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------------------------------

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    pub fn scheduler(&self) -> &PresentationScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.settings
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Release every GPU resource. With `cache_context` set the backend itself is kept in
    /// `cache` for the next `with_cache`; otherwise it is dropped.
    pub fn shutdown(mut self, cache: &mut ContextCache<B>) -> Result<(), EngineError> {
        self.hw.disable(&mut self.backend, &mut self.session);
        let drained = self.scheduler.drain_fences(&mut self.backend);
        self.scheduler.release(&mut self.backend);
        self.readback.release(&mut self.backend);
        self.scratch.release(&mut self.backend);
        self.chain.release(&mut self.backend);
        self.backend.destroy_program(self.composite);

        if self.settings.cache_context {
            tracing::info!(backend = self.backend.name(), "caching video context");
            if cache.store(self.backend).is_some() {
                tracing::debug!("replaced a previously cached video context");
            }
        }
        drained
    }
}

fn default_filter(settings: &VideoSettings) -> FilterMode {
    if settings.smooth {
        FilterMode::Linear
    } else {
        FilterMode::Nearest
    }
}

fn chain_options(settings: &VideoSettings) -> ChainOptions {
    ChainOptions {
        default_filter: default_filter(settings),
        rotation: settings.rotation,
        ..ChainOptions::default()
    }
}

fn load_preset(collab: &Collaborators, path: Option<&Path>) -> Option<Preset> {
    let path = path?;
    match collab.presets.load_preset(path) {
        Ok(preset) => Some(preset),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "shader preset failed to load; using stock chain");
            None
        }
    }
}
