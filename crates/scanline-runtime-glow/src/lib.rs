//! scanline runtime (glow/OpenGL backend)
//
// This crate contains **only** the OpenGL 3.3 core implementation of `VideoBackend`:
// - textures with lazily attached FBOs, depth/stencil renderbuffers
// - program compile/link and per-draw uniform/sampler binding
// - unit-quad and scratch-buffer geometry
// - fences, swap interval, and PBO-based async readback
//
// Windowing and buffer swapping belong to the host and come in through `GlSurface`. The
// context must be current on the calling thread for every call.
#![allow(clippy::missing_safety_doc)]

use std::collections::HashMap;
use std::time::Duration;

use glow::HasContext;

use scanline_core::{
    AttachmentHandle, BackendCaps, BufferHandle, ContextOwner, DrawTarget, FenceHandle,
    FilterMode, Geometry, GraphicsApi, ImageData, NativeHandles, PassDraw, PixelFormat,
    ProgramHandle, ShaderSource, Size, SurfaceMode, TextureDesc, TextureHandle, UniformValue,
    VideoBackend, Viewport, WaitStatus, WrapMode,
};

pub use scanline_core::EngineError;

// -------------------------------------------------------------------------------------------------
// Host surface
// -------------------------------------------------------------------------------------------------

/// The window-system side of a GL context (glutin, SDL, EGL, ...).
pub trait GlSurface: std::fmt::Debug {
    fn swap_buffers(&mut self) -> Result<(), EngineError>;
    fn set_swap_interval(&mut self, interval: i32);
    fn resize(&mut self, size: Size);

    /// Negative swap intervals are honored (`EXT_swap_control_tear`).
    fn supports_adaptive_vsync(&self) -> bool {
        false
    }

    /// Raw context handle handed to hardware-rendered cores.
    fn raw_context(&self) -> usize {
        0
    }

    fn wait_for_vblank(&mut self) {}
}

// -------------------------------------------------------------------------------------------------
// GL object helpers
// -------------------------------------------------------------------------------------------------

/// Offscreen render target (FBO + color texture).
#[derive(Debug)]
pub struct RenderTarget {
    pub fbo: glow::NativeFramebuffer,
    pub tex: glow::NativeTexture,
    pub w: i32,
    pub h: i32,
}

/// `(internal format, format, type)` for texture storage and uploads.
pub fn gl_format(format: PixelFormat) -> (u32, u32, u32) {
    match format {
        PixelFormat::Rgba8Unorm => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        PixelFormat::Rgba8Srgb => (glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
        PixelFormat::Bgra8Unorm => (glow::RGBA8, glow::BGRA, glow::UNSIGNED_BYTE),
        PixelFormat::Rgb565 => (glow::RGB565, glow::RGB, glow::UNSIGNED_SHORT_5_6_5),
        PixelFormat::Rgba16Float => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
        PixelFormat::Rgb10A2Unorm => (
            glow::RGB10_A2,
            glow::RGBA,
            glow::UNSIGNED_INT_2_10_10_10_REV,
        ),
    }
}

fn gl_wrap(wrap: WrapMode) -> i32 {
    (match wrap {
        WrapMode::ClampToBorder => glow::CLAMP_TO_BORDER,
        WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
        WrapMode::Repeat => glow::REPEAT,
        WrapMode::MirroredRepeat => glow::MIRRORED_REPEAT,
    }) as i32
}

fn gl_filters(filter: FilterMode, mipmap: bool) -> (i32, i32) {
    let (min, mag) = match (filter, mipmap) {
        (FilterMode::Linear, false) => (glow::LINEAR, glow::LINEAR),
        (FilterMode::Linear, true) => (glow::LINEAR_MIPMAP_LINEAR, glow::LINEAR),
        (FilterMode::Nearest, false) => (glow::NEAREST, glow::NEAREST),
        (FilterMode::Nearest, true) => (glow::NEAREST_MIPMAP_NEAREST, glow::NEAREST),
    };
    (min as i32, mag as i32)
}

fn mip_levels(size: Size) -> i32 {
    32 - size.width.max(size.height).max(1).leading_zeros() as i32
}

/// GL reads bottom-up; captures are delivered top-down.
pub fn flip_rows(pixels: &mut [u8], row_bytes: usize) {
    if row_bytes == 0 {
        return;
    }
    let rows = pixels.len() / row_bytes;
    for y in 0..rows / 2 {
        let (top, bottom) = pixels.split_at_mut((rows - 1 - y) * row_bytes);
        top[y * row_bytes..(y + 1) * row_bytes].swap_with_slice(&mut bottom[..row_bytes]);
    }
}

pub unsafe fn create_render_target(
    gl: &glow::Context,
    desc: &TextureDesc,
) -> Result<RenderTarget, EngineError> {
    let fbo = gl
        .create_framebuffer()
        .map_err(|e| EngineError::BackendCreate(format!("create_framebuffer failed: {e:?}")))?;
    let tex = match create_texture_storage(gl, desc) {
        Ok(tex) => tex,
        Err(e) => {
            gl.delete_framebuffer(fbo);
            return Err(e);
        }
    };

    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
    gl.framebuffer_texture_2d(
        glow::FRAMEBUFFER,
        glow::COLOR_ATTACHMENT0,
        glow::TEXTURE_2D,
        Some(tex),
        0,
    );

    let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    if status != glow::FRAMEBUFFER_COMPLETE {
        gl.delete_framebuffer(fbo);
        gl.delete_texture(tex);
        tracing::warn!(status, label = desc.label, "framebuffer incomplete");
        return Err(EngineError::Allocation {
            what: desc.label,
            width: desc.size.width,
            height: desc.size.height,
        });
    }

    Ok(RenderTarget {
        fbo,
        tex,
        w: desc.size.width as i32,
        h: desc.size.height as i32,
    })
}

unsafe fn create_texture_storage(
    gl: &glow::Context,
    desc: &TextureDesc,
) -> Result<glow::NativeTexture, EngineError> {
    let tex = gl
        .create_texture()
        .map_err(|e| EngineError::BackendCreate(format!("create_texture failed: {e:?}")))?;
    let (internal, format, ty) = gl_format(desc.format);
    let w = desc.size.width as i32;
    let h = desc.size.height as i32;

    // Drain stale errors so the allocation check below only sees ours.
    for _ in 0..16 {
        if gl.get_error() == glow::NO_ERROR {
            break;
        }
    }

    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    let (min, mag) = gl_filters(FilterMode::Linear, desc.mipmapped);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, min);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, mag);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);

    let levels = if desc.mipmapped { mip_levels(desc.size) } else { 1 };
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAX_LEVEL, levels - 1);
    for level in 0..levels {
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            level,
            internal as i32,
            (w >> level).max(1),
            (h >> level).max(1),
            0,
            format,
            ty,
            None,
        );
    }
    gl.bind_texture(glow::TEXTURE_2D, None);

    if gl.get_error() == glow::OUT_OF_MEMORY {
        gl.delete_texture(tex);
        return Err(EngineError::Allocation {
            what: desc.label,
            width: desc.size.width,
            height: desc.size.height,
        });
    }
    Ok(tex)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    fn gl_kind(self) -> u32 {
        match self {
            Stage::Vertex => glow::VERTEX_SHADER,
            Stage::Fragment => glow::FRAGMENT_SHADER,
        }
    }

    fn rejected(self, log: String) -> EngineError {
        match self {
            Stage::Vertex => EngineError::VertexCompile(log),
            Stage::Fragment => EngineError::FragmentCompile(log),
        }
    }
}

unsafe fn compile_stage(
    gl: &glow::Context,
    stage: Stage,
    src: &str,
) -> Result<glow::NativeShader, EngineError> {
    let shader = gl
        .create_shader(stage.gl_kind())
        .map_err(|e| EngineError::BackendCreate(format!("{stage:?} shader object: {e}")))?;
    gl.shader_source(shader, src);
    gl.compile_shader(shader);
    if gl.get_shader_compile_status(shader) {
        return Ok(shader);
    }
    let log = gl.get_shader_info_log(shader);
    gl.delete_shader(shader);
    Err(stage.rejected(log))
}

/// Compile both stages and link them. Shader objects never outlive this call.
pub unsafe fn compile_program(
    gl: &glow::Context,
    vert_src: &str,
    frag_src: &str,
) -> Result<glow::NativeProgram, EngineError> {
    let vs = compile_stage(gl, Stage::Vertex, vert_src)?;
    let fs = match compile_stage(gl, Stage::Fragment, frag_src) {
        Ok(fs) => fs,
        Err(e) => {
            gl.delete_shader(vs);
            return Err(e);
        }
    };

    let linked = gl.create_program();
    if let Ok(program) = &linked {
        for shader in [vs, fs] {
            gl.attach_shader(*program, shader);
        }
        gl.link_program(*program);
        for shader in [vs, fs] {
            gl.detach_shader(*program, shader);
        }
    }
    gl.delete_shader(vs);
    gl.delete_shader(fs);
    let program =
        linked.map_err(|e| EngineError::BackendCreate(format!("program object: {e}")))?;

    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(EngineError::Link(log));
    }
    tracing::trace!(
        vert_len = vert_src.len(),
        frag_len = frag_src.len(),
        "program linked"
    );
    Ok(program)
}

/// `UNPACK_ROW_LENGTH` for a source `pitch` in bytes. GL counts row length in pixels,
/// so a pitch that is not a whole number of pixels cannot be expressed.
fn unpack_row_length(pitch: usize, bpp: usize) -> Result<i32, EngineError> {
    if bpp == 0 || pitch % bpp != 0 {
        return Err(EngineError::other(format!(
            "pitch {pitch} is not a multiple of the {bpp}-byte pixel size"
        )));
    }
    i32::try_from(pitch / bpp)
        .map_err(|_| EngineError::other(format!("pitch {pitch} exceeds GL row length range")))
}

/// Unit quad `[0,1]^2` as a triangle strip, interleaved `[x, y, u, v]`.
#[derive(Debug)]
pub struct UnitQuad {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
}

impl UnitQuad {
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let verts: [f32; 16] = [
            0.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 1.0, //
            1.0, 1.0, 1.0, 1.0, //
        ];

        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::BackendCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::BackendCreate(format!("create_buffer: {e}")))?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.buffer_data_u8_slice(
            glow::ARRAY_BUFFER,
            bytemuck::cast_slice(&verts),
            glow::STATIC_DRAW,
        );
        set_vertex_layout(gl);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self { vao, vbo })
    }

    pub unsafe fn draw(&self, gl: &glow::Context) {
        gl.bind_vertex_array(Some(self.vao));
        gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
        gl.bind_vertex_array(None);
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

unsafe fn set_vertex_layout(gl: &glow::Context) {
    gl.enable_vertex_attrib_array(0);
    gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);
    gl.enable_vertex_attrib_array(1);
    gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);
}

// -------------------------------------------------------------------------------------------------
// Backend
// -------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct GlTexture {
    tex: glow::NativeTexture,
    /// Created on first render or copy.
    fbo: Option<glow::NativeFramebuffer>,
    desc: TextureDesc,
}

#[derive(Debug)]
struct GlProgram {
    program: glow::NativeProgram,
    locations: HashMap<String, Option<glow::NativeUniformLocation>>,
}

#[derive(Debug)]
struct GlBuffer {
    buffer: glow::NativeBuffer,
    len: usize,
}

#[derive(Debug)]
struct Transfer {
    fence: glow::NativeFence,
    row_bytes: usize,
}

/// OpenGL 3.3 core [`VideoBackend`].
pub struct GlowBackend<S: GlSurface> {
    gl: glow::Context,
    surface: S,
    caps: BackendCaps,
    version: (u32, u32),
    next_id: u64,

    textures: HashMap<u64, GlTexture>,
    programs: HashMap<u64, GlProgram>,
    buffers: HashMap<u64, GlBuffer>,
    attachments: HashMap<u64, (glow::NativeRenderbuffer, bool)>,
    fences: HashMap<u64, glow::NativeFence>,
    transfers: HashMap<u64, Transfer>,

    quad: UnitQuad,
    scratch_vao: glow::NativeVertexArray,
    surface_size: Size,
}

impl<S: GlSurface> std::fmt::Debug for GlowBackend<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `glow::Context` holds raw function pointers; print object counts instead.
        f.debug_struct("GlowBackend")
            .field("surface", &self.surface)
            .field("caps", &self.caps)
            .field("version", &self.version)
            .field("textures", &self.textures.len())
            .field("programs", &self.programs.len())
            .field("buffers", &self.buffers.len())
            .field("fences", &self.fences.len())
            .field("surface_size", &self.surface_size)
            .finish()
    }
}

impl<S: GlSurface> GlowBackend<S> {
    /// Wrap a current GL 3.3+ context.
    pub unsafe fn new(gl: glow::Context, surface: S) -> Result<Self, EngineError> {
        let major = gl.get_parameter_i32(glow::MAJOR_VERSION);
        let minor = gl.get_parameter_i32(glow::MINOR_VERSION);
        if (major, minor) < (3, 3) {
            return Err(EngineError::BackendCreate(format!(
                "OpenGL 3.3 required, context is {major}.{minor}"
            )));
        }
        let caps = BackendCaps {
            max_texture_size: gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE).max(1) as u32,
            max_renderbuffer_size: gl.get_parameter_i32(glow::MAX_RENDERBUFFER_SIZE).max(1)
                as u32,
            frame_latency_wait: false,
            fences: true,
            async_readback: true,
            flip_model: false,
            tearing: false,
            adaptive_vsync: surface.supports_adaptive_vsync(),
            shared_hw_context: true,
        };
        let quad = UnitQuad::new(&gl)?;
        let scratch_vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::BackendCreate(format!("create_vertex_array: {e}")))?;

        tracing::info!(
            major,
            minor,
            max_texture = caps.max_texture_size,
            "OpenGL backend ready"
        );
        Ok(Self {
            gl,
            surface,
            caps,
            version: (major as u32, minor as u32),
            next_id: 1,
            textures: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            attachments: HashMap::new(),
            fences: HashMap::new(),
            transfers: HashMap::new(),
            quad,
            scratch_vao,
            surface_size: Size::default(),
        })
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Native texture behind `texture`, for hosts that sample chain outputs directly.
    pub fn native_texture(&self, texture: TextureHandle) -> Option<glow::NativeTexture> {
        self.textures.get(&texture.0).map(|t| t.tex)
    }

    /// Delete every GL object. The backend must not be used afterwards.
    pub unsafe fn destroy(&mut self) {
        let gl = &self.gl;
        for (_, t) in self.textures.drain() {
            if let Some(fbo) = t.fbo {
                gl.delete_framebuffer(fbo);
            }
            gl.delete_texture(t.tex);
        }
        for (_, p) in self.programs.drain() {
            gl.delete_program(p.program);
        }
        for (_, b) in self.buffers.drain() {
            gl.delete_buffer(b.buffer);
        }
        for (_, (rb, _)) in self.attachments.drain() {
            gl.delete_renderbuffer(rb);
        }
        for (_, f) in self.fences.drain() {
            gl.delete_sync(f);
        }
        for (_, t) in self.transfers.drain() {
            gl.delete_sync(t.fence);
        }
        self.quad.destroy(gl);
        gl.delete_vertex_array(self.scratch_vao);
    }

    fn id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn fbo_for(&mut self, texture: TextureHandle) -> Result<glow::NativeFramebuffer, EngineError> {
        let gl = &self.gl;
        let t = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| EngineError::other(format!("unknown texture #{}", texture.0)))?;
        if let Some(fbo) = t.fbo {
            return Ok(fbo);
        }
        unsafe {
            let fbo = gl.create_framebuffer().map_err(|e| {
                EngineError::BackendCreate(format!("create_framebuffer failed: {e:?}"))
            })?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(t.tex),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                return Err(EngineError::Allocation {
                    what: t.desc.label,
                    width: t.desc.size.width,
                    height: t.desc.size.height,
                });
            }
            t.fbo = Some(fbo);
            Ok(fbo)
        }
    }

    unsafe fn bind_target(&mut self, target: DrawTarget) -> Result<(), EngineError> {
        match target {
            DrawTarget::Texture { texture, size } => {
                let fbo = self.fbo_for(texture)?;
                self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
                self.gl
                    .viewport(0, 0, size.width as i32, size.height as i32);
            }
            DrawTarget::Backbuffer(vp) => {
                self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                self.gl
                    .viewport(vp.x, vp.y, vp.width as i32, vp.height as i32);
            }
        }
        Ok(())
    }

    fn location(&mut self, program: ProgramHandle, name: &str) -> Option<glow::NativeUniformLocation> {
        let gl = &self.gl;
        let p = self.programs.get_mut(&program.0)?;
        if let Some(loc) = p.locations.get(name) {
            return loc.clone();
        }
        let loc = unsafe { gl.get_uniform_location(p.program, name) };
        p.locations.insert(name.to_string(), loc.clone());
        loc
    }

    unsafe fn read_framebuffer(&self, viewport: Viewport, data: glow::PixelPackData<'_>) {
        let gl = &self.gl;
        gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
        gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
        gl.read_pixels(
            viewport.x,
            viewport.y,
            viewport.width as i32,
            viewport.height as i32,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            data,
        );
    }
}

fn wait_result(status: u32) -> WaitStatus {
    match status {
        glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => WaitStatus::Signaled,
        _ => WaitStatus::TimedOut,
    }
}

fn timeout_ns(timeout: Duration) -> i32 {
    timeout.as_nanos().min(i32::MAX as u128) as i32
}

impl<S: GlSurface> VideoBackend for GlowBackend<S> {
    fn name(&self) -> &'static str {
        "gl"
    }

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn native_handles(&self) -> NativeHandles {
        NativeHandles {
            api: GraphicsApi::OpenGl,
            version: self.version,
            device: 0,
            context: self.surface.raw_context(),
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, EngineError> {
        let limit = self.caps.max_texture_size;
        if desc.size.is_empty() || desc.size.width > limit || desc.size.height > limit {
            return Err(EngineError::Allocation {
                what: desc.label,
                width: desc.size.width,
                height: desc.size.height,
            });
        }
        let (tex, fbo) = unsafe {
            if desc.usage.is_renderable() {
                let rt = create_render_target(&self.gl, desc)?;
                (rt.tex, Some(rt.fbo))
            } else {
                (create_texture_storage(&self.gl, desc)?, None)
            }
        };
        let id = self.id();
        self.textures.insert(id, GlTexture { tex, fbo, desc: *desc });
        tracing::debug!(
            id,
            label = desc.label,
            width = desc.size.width,
            height = desc.size.height,
            format = ?desc.format,
            "texture created"
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(t) = self.textures.remove(&texture.0) {
            unsafe {
                if let Some(fbo) = t.fbo {
                    self.gl.delete_framebuffer(fbo);
                }
                self.gl.delete_texture(t.tex);
            }
        }
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        image: &ImageData<'_>,
    ) -> Result<(), EngineError> {
        let t = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| EngineError::other(format!("upload into unknown texture #{}", texture.0)))?;
        if !image.is_consistent() {
            return Err(EngineError::other("upload buffer shorter than its pitch implies"));
        }
        let (_, format, ty) = gl_format(image.format);
        let row_length = unpack_row_length(image.pitch, image.format.bytes_per_pixel())?;
        let gl = &self.gl;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(t.tex));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, row_length);
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                image.size.width as i32,
                image.size.height as i32,
                format,
                ty,
                glow::PixelUnpackData::Slice(image.bytes),
            );
            gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, 0);
            if t.desc.mipmapped {
                gl.generate_mipmap(glow::TEXTURE_2D);
            }
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(())
    }

    fn copy_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        size: Size,
    ) -> Result<(), EngineError> {
        let src_fbo = self.fbo_for(src)?;
        let dst_fbo = self.fbo_for(dst)?;
        let w = size.width as i32;
        let h = size.height as i32;
        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(src_fbo));
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(dst_fbo));
            gl.blit_framebuffer(
                0,
                0,
                w,
                h,
                0,
                0,
                w,
                h,
                glow::COLOR_BUFFER_BIT,
                glow::NEAREST,
            );
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
        }
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        if let Some(t) = self.textures.get(&texture.0) {
            unsafe {
                self.gl.bind_texture(glow::TEXTURE_2D, Some(t.tex));
                self.gl.generate_mipmap(glow::TEXTURE_2D);
                self.gl.bind_texture(glow::TEXTURE_2D, None);
            }
        }
    }

    fn create_depth_stencil(
        &mut self,
        size: Size,
        stencil: bool,
    ) -> Result<AttachmentHandle, EngineError> {
        let internal = if stencil {
            glow::DEPTH24_STENCIL8
        } else {
            glow::DEPTH_COMPONENT24
        };
        let rb = unsafe {
            let rb = self.gl.create_renderbuffer().map_err(|e| {
                EngineError::BackendCreate(format!("create_renderbuffer failed: {e:?}"))
            })?;
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, Some(rb));
            self.gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                internal,
                size.width as i32,
                size.height as i32,
            );
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            rb
        };
        let id = self.id();
        self.attachments.insert(id, (rb, stencil));
        Ok(AttachmentHandle(id))
    }

    fn attach_depth_stencil(
        &mut self,
        target: TextureHandle,
        attachment: AttachmentHandle,
    ) -> Result<(), EngineError> {
        let (rb, stencil) = *self
            .attachments
            .get(&attachment.0)
            .ok_or_else(|| EngineError::other("unknown depth/stencil attachment"))?;
        let fbo = self.fbo_for(target)?;
        let point = if stencil {
            glow::DEPTH_STENCIL_ATTACHMENT
        } else {
            glow::DEPTH_ATTACHMENT
        };
        let gl = &self.gl;
        let status = unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_renderbuffer(glow::FRAMEBUFFER, point, glow::RENDERBUFFER, Some(rb));
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.framebuffer_renderbuffer(glow::FRAMEBUFFER, point, glow::RENDERBUFFER, None);
            }
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            status
        };
        if status != glow::FRAMEBUFFER_COMPLETE {
            return Err(EngineError::BackendCreate(format!(
                "depth/stencil attachment incomplete: 0x{status:x}"
            )));
        }
        Ok(())
    }

    fn destroy_depth_stencil(&mut self, attachment: AttachmentHandle) {
        if let Some((rb, _)) = self.attachments.remove(&attachment.0) {
            unsafe { self.gl.delete_renderbuffer(rb) };
        }
    }

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle, EngineError> {
        let program = unsafe { compile_program(&self.gl, &source.vert, &source.frag) }.map_err(
            |e| {
                tracing::debug!(origin = ?source.origin, error = %e, "program rejected");
                e
            },
        )?;
        let id = self.id();
        self.programs.insert(
            id,
            GlProgram {
                program,
                locations: HashMap::new(),
            },
        );
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if let Some(p) = self.programs.remove(&program.0) {
            unsafe { self.gl.delete_program(p.program) };
        }
    }

    fn create_buffer(&mut self, size: usize) -> Result<BufferHandle, EngineError> {
        let buffer = unsafe {
            let buffer = self
                .gl
                .create_buffer()
                .map_err(|e| EngineError::BackendCreate(format!("create_buffer failed: {e:?}")))?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl
                .buffer_data_size(glow::ARRAY_BUFFER, size.max(1) as i32, glow::DYNAMIC_DRAW);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            buffer
        };
        let id = self.id();
        self.buffers.insert(id, GlBuffer { buffer, len: size });
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), EngineError> {
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| EngineError::other(format!("unknown buffer #{}", buffer.0)))?;
        let gl = &self.gl;
        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(b.buffer));
            if data.len() > b.len {
                gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, data, glow::DYNAMIC_DRAW);
                b.len = data.len();
            } else {
                gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, data);
            }
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(b) = self.buffers.remove(&buffer.0) {
            unsafe { self.gl.delete_buffer(b.buffer) };
        }
        if let Some(t) = self.transfers.remove(&buffer.0) {
            unsafe { self.gl.delete_sync(t.fence) };
        }
    }

    fn clear(&mut self, target: DrawTarget, color: [f32; 4]) {
        unsafe {
            if let Err(e) = self.bind_target(target) {
                tracing::warn!(error = %e, "clear target unavailable");
                return;
            }
            let gl = &self.gl;
            gl.clear_color(color[0], color[1], color[2], color[3]);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT | glow::STENCIL_BUFFER_BIT);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
    }

    fn draw(&mut self, draw: &PassDraw<'_>) -> Result<(), EngineError> {
        let program = self
            .programs
            .get(&draw.program.0)
            .map(|p| p.program)
            .ok_or_else(|| EngineError::other(format!("unknown program #{}", draw.program.0)))?;

        // Resolve every location and texture before touching GL state.
        let mut samplers = Vec::with_capacity(draw.textures.len());
        for bound in draw.textures {
            let tex = self
                .textures
                .get(&bound.texture.0)
                .map(|t| t.tex)
                .ok_or_else(|| {
                    EngineError::other(format!("'{}' bound to unknown texture", bound.name))
                })?;
            samplers.push((bound, tex, self.location(draw.program, &bound.name)));
        }
        let mut uniforms = Vec::with_capacity(draw.uniforms.len());
        for u in draw.uniforms {
            if let Some(loc) = self.location(draw.program, &u.name) {
                uniforms.push((loc, u.value));
            }
        }
        let geometry = match draw.geometry {
            Geometry::FullscreenQuad => None,
            Geometry::Buffer {
                buffer,
                vertex_count,
            } => {
                let b = self
                    .buffers
                    .get(&buffer.0)
                    .ok_or_else(|| EngineError::other("draw with unknown vertex buffer"))?;
                Some((b.buffer, vertex_count as i32))
            }
        };

        unsafe {
            self.bind_target(draw.target)?;
            let gl = &self.gl;
            if let Some(c) = draw.clear {
                gl.clear_color(c[0], c[1], c[2], c[3]);
                gl.clear(glow::COLOR_BUFFER_BIT);
            }
            if draw.blend {
                gl.enable(glow::BLEND);
                gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            } else {
                gl.disable(glow::BLEND);
            }

            gl.use_program(Some(program));
            for (bound, tex, loc) in &samplers {
                let (min, mag) = gl_filters(bound.filter, bound.mipmap);
                gl.active_texture(glow::TEXTURE0 + bound.binding);
                gl.bind_texture(glow::TEXTURE_2D, Some(*tex));
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, min);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, mag);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, gl_wrap(bound.wrap));
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, gl_wrap(bound.wrap));
                if loc.is_some() {
                    gl.uniform_1_i32(loc.as_ref(), bound.binding as i32);
                }
            }
            for (loc, value) in &uniforms {
                match value {
                    UniformValue::F32(v) => gl.uniform_1_f32(Some(loc), *v),
                    UniformValue::I32(v) => gl.uniform_1_i32(Some(loc), *v),
                    UniformValue::U32(v) => gl.uniform_1_u32(Some(loc), *v),
                    UniformValue::Vec4(v) => gl.uniform_4_f32(Some(loc), v[0], v[1], v[2], v[3]),
                    UniformValue::Mat4(m) => gl.uniform_matrix_4_f32_slice(Some(loc), false, m),
                }
            }

            match geometry {
                None => self.quad.draw(gl),
                Some((buffer, count)) => {
                    gl.bind_vertex_array(Some(self.scratch_vao));
                    gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
                    set_vertex_layout(gl);
                    gl.draw_arrays(glow::TRIANGLE_STRIP, 0, count);
                    gl.bind_buffer(glow::ARRAY_BUFFER, None);
                    gl.bind_vertex_array(None);
                }
            }

            for (bound, _, _) in &samplers {
                gl.active_texture(glow::TEXTURE0 + bound.binding);
                gl.bind_texture(glow::TEXTURE_2D, None);
            }
            gl.active_texture(glow::TEXTURE0);
            gl.use_program(None);
            gl.disable(glow::BLEND);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        Ok(())
    }

    fn create_surface(&mut self, size: Size, mode: SurfaceMode) -> Result<(), EngineError> {
        if mode != SurfaceMode::Legacy {
            return Err(EngineError::Unsupported("flip-model presentation"));
        }
        self.surface.resize(size);
        self.surface_size = size;
        Ok(())
    }

    fn resize_surface(&mut self, size: Size, mode: SurfaceMode) -> Result<(), EngineError> {
        self.create_surface(size, mode)
    }

    fn set_swap_interval(&mut self, interval: i32) {
        self.surface.set_swap_interval(interval);
    }

    fn present(&mut self, _allow_tearing: bool) -> Result<(), EngineError> {
        self.surface.swap_buffers()
    }

    fn wait_for_vblank(&mut self) {
        self.surface.wait_for_vblank();
    }

    fn insert_fence(&mut self) -> Result<FenceHandle, EngineError> {
        let fence = unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(|e| EngineError::BackendCreate(format!("fence_sync failed: {e}")))?;
        let id = self.id();
        self.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> WaitStatus {
        let Some(f) = self.fences.get(&fence.0) else {
            return WaitStatus::Signaled;
        };
        let status = unsafe {
            self.gl
                .client_wait_sync(*f, glow::SYNC_FLUSH_COMMANDS_BIT, timeout_ns(timeout))
        };
        wait_result(status)
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Some(f) = self.fences.remove(&fence.0) {
            unsafe { self.gl.delete_sync(f) };
        }
    }

    fn read_backbuffer(&mut self, viewport: Viewport, dst: &mut [u8]) -> Result<(), EngineError> {
        let row_bytes = viewport.width as usize * 4;
        if dst.len() < row_bytes * viewport.height as usize {
            return Err(EngineError::other("readback destination too small"));
        }
        unsafe {
            self.read_framebuffer(viewport, glow::PixelPackData::Slice(&mut *dst));
        }
        flip_rows(&mut dst[..row_bytes * viewport.height as usize], row_bytes);
        Ok(())
    }

    fn begin_backbuffer_transfer(
        &mut self,
        buffer: BufferHandle,
        viewport: Viewport,
    ) -> Result<(), EngineError> {
        let row_bytes = viewport.width as usize * 4;
        let len = row_bytes * viewport.height as usize;
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| EngineError::other("transfer into unknown buffer"))?;
        let pbo = b.buffer;
        let gl = &self.gl;
        unsafe {
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(pbo));
            if b.len < len {
                gl.buffer_data_size(glow::PIXEL_PACK_BUFFER, len as i32, glow::STREAM_READ);
                b.len = len;
            }
            self.read_framebuffer(viewport, glow::PixelPackData::BufferOffset(0));
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        let fence = unsafe { gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(|e| EngineError::BackendCreate(format!("fence_sync failed: {e}")))?;
        if let Some(old) = self.transfers.insert(buffer.0, Transfer { fence, row_bytes }) {
            unsafe { self.gl.delete_sync(old.fence) };
        }
        Ok(())
    }

    fn transfer_ready(&mut self, buffer: BufferHandle) -> bool {
        match self.transfers.get(&buffer.0) {
            Some(t) => unsafe { self.gl.get_sync_status(t.fence) == glow::SIGNALED },
            None => false,
        }
    }

    fn read_transfer(&mut self, buffer: BufferHandle, dst: &mut [u8]) -> Result<(), EngineError> {
        let t = self
            .transfers
            .remove(&buffer.0)
            .ok_or_else(|| EngineError::other("no transfer queued for buffer"))?;
        let pbo = self
            .buffers
            .get(&buffer.0)
            .map(|b| b.buffer)
            .ok_or_else(|| EngineError::other("transfer buffer destroyed"))?;
        unsafe {
            self.gl.delete_sync(t.fence);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(pbo));
            self.gl.get_buffer_sub_data(glow::PIXEL_PACK_BUFFER, 0, dst);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        flip_rows(dst, t.row_bytes);
        Ok(())
    }

    fn bind_hw_context(&mut self, owner: ContextOwner) {
        // Both sides expect a neutral binding state on entry.
        unsafe {
            let gl = &self.gl;
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.use_program(None);
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.disable(glow::BLEND);
        }
        tracing::trace!(?owner, "GL context handed over");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_rows_reverses_row_order() {
        let mut px = vec![1u8, 1, 2, 2, 3, 3];
        flip_rows(&mut px, 2);
        assert_eq!(px, vec![3, 3, 2, 2, 1, 1]);

        let mut even = vec![1u8, 2, 3, 4];
        flip_rows(&mut even, 1);
        assert_eq!(even, vec![4, 3, 2, 1]);
    }

    #[test]
    fn mip_levels_cover_largest_axis() {
        assert_eq!(mip_levels(Size::new(1, 1)), 1);
        assert_eq!(mip_levels(Size::new(256, 64)), 9);
        assert_eq!(mip_levels(Size::new(300, 2)), 9);
    }

    #[test]
    fn row_length_counts_whole_pixels_only() {
        assert_eq!(unpack_row_length(1024, 4).expect("aligned"), 256);
        // 16-bit formats with an odd byte pitch (e.g. a 641-byte core row).
        assert!(unpack_row_length(641, 2).is_err());
        assert!(unpack_row_length(1030, 4).is_err());
        assert_eq!(unpack_row_length(1282, 2).expect("rgb565 row"), 641);
    }

    #[test]
    fn shader_stages_report_their_own_error_kind() {
        assert!(matches!(
            Stage::Vertex.rejected("v".into()),
            EngineError::VertexCompile(_)
        ));
        assert!(matches!(
            Stage::Fragment.rejected("f".into()),
            EngineError::FragmentCompile(_)
        ));
    }

    #[test]
    fn packed_formats_map_to_matching_gl_types() {
        assert_eq!(
            gl_format(PixelFormat::Rgb565),
            (glow::RGB565, glow::RGB, glow::UNSIGNED_SHORT_5_6_5)
        );
        assert_eq!(gl_format(PixelFormat::Bgra8Unorm).1, glow::BGRA);
        assert_eq!(gl_format(PixelFormat::Rgba16Float).0, glow::RGBA16F);
    }
}
