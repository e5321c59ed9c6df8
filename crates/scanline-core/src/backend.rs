//! The polymorphic graphics-backend interface.
//!
//! The pass-graph engine, the presentation scheduler and the readback path are written once
//! against [`VideoBackend`]. Each supported graphics API provides one implementation
//! (`scanline-runtime-glow`, `scanline-runtime-headless`, ...). Backends own every native
//! object and hand out opaque handles; the engine never sees API types.

use std::time::Duration;

use crate::error::EngineError;
use crate::types::{FilterMode, ImageData, Mat4, PixelFormat, Size, Viewport, WrapMode};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle!(
    /// A 2D image (sampled, renderable, or both).
    TextureHandle
);
handle!(
    /// A linked shader program.
    ProgramHandle
);
handle!(
    /// A linear GPU buffer: scratch vertex data or readback transfer storage.
    BufferHandle
);
handle!(
    /// A GPU completion fence.
    FenceHandle
);
handle!(
    /// A depth or depth/stencil attachment.
    AttachmentHandle
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    Sampled,
    RenderTarget,
    /// Rendered into by one pass and sampled by a later one (every chain target).
    Both,
}

impl TextureUsage {
    pub fn is_renderable(self) -> bool {
        matches!(self, TextureUsage::RenderTarget | TextureUsage::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub size: Size,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    /// Allocate a full mip chain (passes with `mipmap_input`, mipmapped LUTs).
    pub mipmapped: bool,
    pub label: &'static str,
}

impl TextureDesc {
    pub fn render_target(size: Size, format: PixelFormat, label: &'static str) -> Self {
        Self {
            size,
            format,
            usage: TextureUsage::Both,
            mipmapped: false,
            label,
        }
    }

    pub fn sampled(size: Size, format: PixelFormat, label: &'static str) -> Self {
        Self {
            size,
            format,
            usage: TextureUsage::Sampled,
            mipmapped: false,
            label,
        }
    }
}

/// Capability report used by the scheduler, the HW-render bridge and the readback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCaps {
    pub max_texture_size: u32,
    pub max_renderbuffer_size: u32,
    /// Bounded presentation queue with a waitable object.
    pub frame_latency_wait: bool,
    pub fences: bool,
    pub async_readback: bool,
    /// Flip-model presentation surfaces.
    pub flip_model: bool,
    /// Presents may tear when vsync is off.
    pub tearing: bool,
    /// Negative swap intervals ("late swap tearing").
    pub adaptive_vsync: bool,
    /// The HW-rendered core shares one graphics context with the frontend.
    pub shared_hw_context: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    OpenGl,
    OpenGlEs,
    Direct3D11,
    Headless,
}

/// Raw device/context identifiers exposed to hardware-rendered cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandles {
    pub api: GraphicsApi,
    pub version: (u32, u32),
    pub device: usize,
    pub context: usize,
}

#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub vert: String,
    pub frag: String,
    /// Optional human-friendly origin (path/label) for logs.
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Texture { texture: TextureHandle, size: Size },
    Backbuffer(Viewport),
}

impl DrawTarget {
    pub fn size(&self) -> Size {
        match self {
            DrawTarget::Texture { size, .. } => *size,
            DrawTarget::Backbuffer(vp) => vp.size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundTexture {
    pub binding: u32,
    /// Sampler name in the program (semantic name, alias or LUT name).
    pub name: String,
    pub texture: TextureHandle,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mipmap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Vec4([f32; 4]),
    Mat4(Mat4),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundUniform {
    pub name: String,
    pub value: UniformValue,
}

/// Vertex source for a draw. Buffers hold interleaved `[x, y, u, v]` f32 vertices drawn as
/// a triangle strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    FullscreenQuad,
    Buffer {
        buffer: BufferHandle,
        vertex_count: u32,
    },
}

/// One data-driven draw: every pass, the composite blit and overlay quads go through this.
#[derive(Debug, Clone)]
pub struct PassDraw<'a> {
    pub program: ProgramHandle,
    pub target: DrawTarget,
    pub textures: &'a [BoundTexture],
    pub uniforms: &'a [BoundUniform],
    pub geometry: Geometry,
    pub clear: Option<[f32; 4]>,
    pub blend: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMode {
    /// Flip-model / low-latency presentation (preferred).
    Flip { allow_tearing: bool, waitable: bool },
    /// Conservative blit-model presentation, the one-time fallback.
    Legacy,
}

impl SurfaceMode {
    pub fn allows_tearing(&self) -> bool {
        matches!(
            self,
            SurfaceMode::Flip {
                allow_tearing: true,
                ..
            }
        )
    }

    pub fn is_waitable(&self) -> bool {
        matches!(self, SurfaceMode::Flip { waitable: true, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContextOwner {
    #[default]
    Frontend,
    Core,
}

/// Graphics-API adapter consumed by the whole pipeline.
///
/// Optional features have default implementations that report "unsupported" or act as a
/// no-op; [`VideoBackend::caps`] tells callers which ones are real.
pub trait VideoBackend: std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn caps(&self) -> BackendCaps;
    fn native_handles(&self) -> NativeHandles;

    // ---- textures ----
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, EngineError>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        image: &ImageData<'_>,
    ) -> Result<(), EngineError>;
    /// Copy the top-left `size` region of `src` into `dst`.
    fn copy_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        size: Size,
    ) -> Result<(), EngineError>;
    fn generate_mipmaps(&mut self, _texture: TextureHandle) {}

    fn create_depth_stencil(
        &mut self,
        size: Size,
        stencil: bool,
    ) -> Result<AttachmentHandle, EngineError>;
    fn attach_depth_stencil(
        &mut self,
        target: TextureHandle,
        attachment: AttachmentHandle,
    ) -> Result<(), EngineError>;
    fn destroy_depth_stencil(&mut self, attachment: AttachmentHandle);

    // ---- programs ----
    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle, EngineError>;
    fn destroy_program(&mut self, program: ProgramHandle);

    // ---- buffers ----
    fn create_buffer(&mut self, size: usize) -> Result<BufferHandle, EngineError>;
    /// Replace the buffer contents, growing its storage if `data` is larger.
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), EngineError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // ---- drawing ----
    fn clear(&mut self, target: DrawTarget, color: [f32; 4]);
    fn draw(&mut self, draw: &PassDraw<'_>) -> Result<(), EngineError>;

    // ---- presentation ----
    fn create_surface(&mut self, size: Size, mode: SurfaceMode) -> Result<(), EngineError>;
    fn resize_surface(&mut self, size: Size, mode: SurfaceMode) -> Result<(), EngineError>;
    fn set_swap_interval(&mut self, interval: i32);
    fn present(&mut self, allow_tearing: bool) -> Result<(), EngineError>;

    /// Returns the latency the surface actually granted.
    fn set_max_frame_latency(&mut self, _frames: u32) -> Result<u32, EngineError> {
        Err(EngineError::Unsupported("frame latency limiting"))
    }
    fn wait_frame_latency(&mut self, _timeout: Duration) -> WaitStatus {
        WaitStatus::Signaled
    }
    fn wait_for_vblank(&mut self) {}

    fn insert_fence(&mut self) -> Result<FenceHandle, EngineError> {
        Err(EngineError::Unsupported("gpu fences"))
    }
    fn wait_fence(&mut self, _fence: FenceHandle, _timeout: Duration) -> WaitStatus {
        WaitStatus::Signaled
    }
    fn destroy_fence(&mut self, _fence: FenceHandle) {}

    // ---- readback ----
    /// Blocking copy of the backbuffer region into `dst` (RGBA8, tightly packed).
    fn read_backbuffer(&mut self, viewport: Viewport, dst: &mut [u8]) -> Result<(), EngineError>;
    /// Queue a non-blocking backbuffer copy into a transfer buffer.
    fn begin_backbuffer_transfer(
        &mut self,
        _buffer: BufferHandle,
        _viewport: Viewport,
    ) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("async readback"))
    }
    /// `true` once the copy queued into `buffer` has completed on the GPU.
    fn transfer_ready(&mut self, _buffer: BufferHandle) -> bool {
        true
    }
    fn read_transfer(&mut self, _buffer: BufferHandle, _dst: &mut [u8]) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("async readback"))
    }

    // ---- shared context ----
    fn bind_hw_context(&mut self, _owner: ContextOwner) {}
}
