//! scanline runtime (headless backend)
//
// A CPU-side `VideoBackend` that records every operation instead of talking to a GPU.
// - every draw writes a fresh content marker into its target
// - every sampled input's marker is recorded with the draw
// - uploads/copies carry bytes and markers, so history/feedback identity is observable
// - failure injection for allocation, surfaces, attachments and hung fences
//
// It does NOT rasterize anything.
#![deny(missing_debug_implementations)]

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use scanline_core::{
    AttachmentHandle, BackendCaps, BoundUniform, BufferHandle, ContextOwner, DrawTarget,
    FenceHandle, GraphicsApi, ImageData, NativeHandles, PassDraw, ProgramHandle, ShaderSource,
    Size, SurfaceMode, TextureDesc, TextureHandle, UniformValue, VideoBackend, Viewport,
    WaitStatus,
};

pub use scanline_core::EngineError;

#[derive(Debug, Clone)]
struct Texture {
    desc: TextureDesc,
    bytes: Vec<u8>,
    marker: u64,
}

/// One sampled input as seen by a draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub name: String,
    pub texture: TextureHandle,
    pub marker: u64,
}

#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub target: DrawTarget,
    /// Marker written into the target by this draw.
    pub marker: u64,
    pub inputs: Vec<InputRecord>,
    pub uniforms: Vec<BoundUniform>,
    pub geometry_buffer: Option<BufferHandle>,
}

impl DrawRecord {
    pub fn input(&self, name: &str) -> Option<&InputRecord> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| u.value)
    }

    pub fn targets_backbuffer(&self) -> bool {
        matches!(self.target, DrawTarget::Backbuffer(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRecord {
    pub swap_interval: i32,
    pub allow_tearing: bool,
    /// Backbuffer content marker at present time (`0` is a black clear).
    pub marker: u64,
}

/// Failure injection switches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Faults {
    /// Fail the next N texture creations.
    pub texture_allocations: u32,
    pub flip_surface: bool,
    pub all_surfaces: bool,
    pub attachments: bool,
    pub hung_fences: bool,
    pub hung_latency_wait: bool,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    caps: BackendCaps,
    pub faults: Faults,

    next_id: u64,
    next_marker: u64,

    textures: HashMap<u64, Texture>,
    buffers: HashMap<u64, Vec<u8>>,
    programs: HashMap<u64, ShaderSource>,
    attachments: HashMap<u64, (Size, bool)>,
    attached: HashMap<u64, u64>,
    fences: HashSet<u64>,
    transfers: HashMap<u64, u32>,
    transfer_latency: u32,

    surface: Option<(Size, SurfaceMode)>,
    backbuffer_marker: u64,
    swap_interval: i32,
    max_frame_latency: Option<u32>,
    owner: ContextOwner,

    draws: Vec<DrawRecord>,
    presents: Vec<PresentRecord>,
    interval_log: Vec<i32>,
    texture_ops: Vec<String>,
    peak_live: usize,
    latency_waits: u32,
    vblank_waits: u32,
    fence_waits: u32,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_caps(BackendCaps {
            max_texture_size: 16384,
            max_renderbuffer_size: 16384,
            frame_latency_wait: true,
            fences: true,
            async_readback: true,
            flip_model: true,
            tearing: true,
            adaptive_vsync: true,
            shared_hw_context: true,
        })
    }

    pub fn with_caps(caps: BackendCaps) -> Self {
        Self {
            caps,
            faults: Faults::default(),
            next_id: 1,
            next_marker: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            attachments: HashMap::new(),
            attached: HashMap::new(),
            fences: HashSet::new(),
            transfers: HashMap::new(),
            transfer_latency: 0,
            surface: None,
            backbuffer_marker: 0,
            swap_interval: 1,
            max_frame_latency: None,
            owner: ContextOwner::Frontend,
            draws: Vec::new(),
            presents: Vec::new(),
            interval_log: Vec::new(),
            texture_ops: Vec::new(),
            peak_live: 0,
            latency_waits: 0,
            vblank_waits: 0,
            fence_waits: 0,
        }
    }

    pub fn caps_mut(&mut self) -> &mut BackendCaps {
        &mut self.caps
    }

    /// Number of `transfer_ready` polls that report "not ready" for each new transfer.
    pub fn set_transfer_latency(&mut self, polls: u32) {
        self.transfer_latency = polls;
    }

    // ---- inspection ----

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn presents(&self) -> &[PresentRecord] {
        &self.presents
    }

    /// Every swap interval applied, in order.
    pub fn swap_intervals(&self) -> &[i32] {
        &self.interval_log
    }

    pub fn swap_interval(&self) -> i32 {
        self.swap_interval
    }

    pub fn surface(&self) -> Option<(Size, SurfaceMode)> {
        self.surface
    }

    pub fn max_frame_latency(&self) -> Option<u32> {
        self.max_frame_latency
    }

    pub fn latency_waits(&self) -> u32 {
        self.latency_waits
    }

    pub fn vblank_waits(&self) -> u32 {
        self.vblank_waits
    }

    pub fn fence_waits(&self) -> u32 {
        self.fence_waits
    }

    pub fn live_fence_count(&self) -> usize {
        self.fences.len()
    }

    pub fn context_owner(&self) -> ContextOwner {
        self.owner
    }

    pub fn is_live_texture(&self, t: TextureHandle) -> bool {
        self.textures.contains_key(&t.0)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn attached_depth_stencil(&self, t: TextureHandle) -> Option<AttachmentHandle> {
        self.attached.get(&t.0).copied().map(AttachmentHandle)
    }

    pub fn texture_size(&self, t: TextureHandle) -> Option<Size> {
        self.textures.get(&t.0).map(|tex| tex.desc.size)
    }

    pub fn texture_desc(&self, t: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&t.0).map(|tex| tex.desc)
    }

    pub fn texture_marker(&self, t: TextureHandle) -> Option<u64> {
        self.textures.get(&t.0).map(|tex| tex.marker)
    }

    pub fn texture_bytes(&self, t: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&t.0).map(|tex| tex.bytes.as_slice())
    }

    pub fn buffer_bytes(&self, b: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&b.0).map(Vec::as_slice)
    }

    pub fn program_source(&self, p: ProgramHandle) -> Option<&ShaderSource> {
        self.programs.get(&p.0)
    }

    pub fn backbuffer_marker(&self) -> u64 {
        self.backbuffer_marker
    }

    /// `create ...` / `destroy ...` entries for texture lifetime ordering checks.
    pub fn texture_ops(&self) -> &[String] {
        &self.texture_ops
    }

    pub fn peak_live_textures_since_log_clear(&self) -> usize {
        self.peak_live
    }

    /// Forget recorded draws/presents/ops; live objects are untouched.
    pub fn clear_log(&mut self) {
        self.draws.clear();
        self.presents.clear();
        self.interval_log.clear();
        self.texture_ops.clear();
        self.peak_live = self.textures.len();
        self.latency_waits = 0;
        self.vblank_waits = 0;
        self.fence_waits = 0;
    }

    fn id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn marker(&mut self) -> u64 {
        let m = self.next_marker;
        self.next_marker += 1;
        m
    }

    fn check_surface(&self, size: Size, mode: SurfaceMode) -> Result<(), EngineError> {
        if self.faults.all_surfaces {
            return Err(EngineError::SurfaceCreation("injected surface failure".into()));
        }
        let flip = matches!(mode, SurfaceMode::Flip { .. });
        if flip && (self.faults.flip_surface || !self.caps.flip_model) {
            return Err(EngineError::SurfaceCreation("flip model unavailable".into()));
        }
        if size.is_empty() {
            return Err(EngineError::SurfaceCreation(format!(
                "invalid surface size {}x{}",
                size.width, size.height
            )));
        }
        Ok(())
    }

    fn backbuffer_pixels(&self, viewport: Viewport, dst: &mut [u8]) {
        let px = (self.backbuffer_marker as u32).to_le_bytes();
        let n = (viewport.width as usize * viewport.height as usize * 4).min(dst.len());
        for chunk in dst[..n].chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }
}

impl VideoBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn native_handles(&self) -> NativeHandles {
        NativeHandles {
            api: GraphicsApi::Headless,
            version: (1, 0),
            device: 0,
            context: 0,
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, EngineError> {
        let too_big = desc.size.width > self.caps.max_texture_size
            || desc.size.height > self.caps.max_texture_size;
        if self.faults.texture_allocations > 0 || desc.size.is_empty() || too_big {
            self.faults.texture_allocations = self.faults.texture_allocations.saturating_sub(1);
            return Err(EngineError::Allocation {
                what: desc.label,
                width: desc.size.width,
                height: desc.size.height,
            });
        }
        let id = self.id();
        self.textures.insert(
            id,
            Texture {
                desc: *desc,
                bytes: Vec::new(),
                marker: 0,
            },
        );
        self.texture_ops.push(format!(
            "create #{id} {}x{}",
            desc.size.width, desc.size.height
        ));
        self.peak_live = self.peak_live.max(self.textures.len());
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.texture_ops.push(format!("destroy #{}", texture.0));
        }
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        image: &ImageData<'_>,
    ) -> Result<(), EngineError> {
        if !image.is_consistent() {
            return Err(EngineError::other("upload: image data shorter than pitch * height"));
        }
        let marker = self.marker();
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| EngineError::other(format!("upload to unknown texture #{}", texture.0)))?;
        tex.bytes.clear();
        let row = image.row_bytes();
        for y in 0..image.size.height as usize {
            let start = y * image.pitch;
            tex.bytes.extend_from_slice(&image.bytes[start..start + row]);
        }
        tex.marker = marker;
        Ok(())
    }

    fn copy_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        _size: Size,
    ) -> Result<(), EngineError> {
        let (bytes, marker) = self
            .textures
            .get(&src.0)
            .map(|t| (t.bytes.clone(), t.marker))
            .ok_or_else(|| EngineError::other(format!("copy from unknown texture #{}", src.0)))?;
        let tex = self
            .textures
            .get_mut(&dst.0)
            .ok_or_else(|| EngineError::other(format!("copy to unknown texture #{}", dst.0)))?;
        tex.bytes = bytes;
        tex.marker = marker;
        Ok(())
    }

    fn create_depth_stencil(
        &mut self,
        size: Size,
        stencil: bool,
    ) -> Result<AttachmentHandle, EngineError> {
        let max = self.caps.max_renderbuffer_size;
        if self.faults.attachments || size.width > max || size.height > max {
            return Err(EngineError::Allocation {
                what: "depth/stencil attachment",
                width: size.width,
                height: size.height,
            });
        }
        let id = self.id();
        self.attachments.insert(id, (size, stencil));
        Ok(AttachmentHandle(id))
    }

    fn attach_depth_stencil(
        &mut self,
        target: TextureHandle,
        attachment: AttachmentHandle,
    ) -> Result<(), EngineError> {
        if !self.textures.contains_key(&target.0) || !self.attachments.contains_key(&attachment.0) {
            return Err(EngineError::BackendCreate("incomplete framebuffer".into()));
        }
        self.attached.insert(target.0, attachment.0);
        Ok(())
    }

    fn destroy_depth_stencil(&mut self, attachment: AttachmentHandle) {
        self.attachments.remove(&attachment.0);
        self.attached.retain(|_, a| *a != attachment.0);
    }

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle, EngineError> {
        // `#error` is the one directive every GLSL compiler must reject.
        if source.vert.contains("#error") {
            return Err(EngineError::VertexCompile("#error directive".into()));
        }
        if source.frag.contains("#error") {
            return Err(EngineError::FragmentCompile("#error directive".into()));
        }
        let id = self.id();
        self.programs.insert(id, source.clone());
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }

    fn create_buffer(&mut self, size: usize) -> Result<BufferHandle, EngineError> {
        let id = self.id();
        self.buffers.insert(id, vec![0; size]);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), EngineError> {
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| EngineError::other(format!("write to unknown buffer #{}", buffer.0)))?;
        b.clear();
        b.extend_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
        self.transfers.remove(&buffer.0);
    }

    fn clear(&mut self, target: DrawTarget, _color: [f32; 4]) {
        match target {
            DrawTarget::Texture { texture, .. } => {
                if let Some(t) = self.textures.get_mut(&texture.0) {
                    t.bytes.clear();
                    t.marker = 0;
                }
            }
            DrawTarget::Backbuffer(_) => self.backbuffer_marker = 0,
        }
    }

    fn draw(&mut self, draw: &PassDraw<'_>) -> Result<(), EngineError> {
        if !self.programs.contains_key(&draw.program.0) {
            return Err(EngineError::other(format!(
                "draw with unknown program #{}",
                draw.program.0
            )));
        }
        let target_tex = match draw.target {
            DrawTarget::Texture { texture, .. } => Some(texture),
            DrawTarget::Backbuffer(_) => None,
        };

        let mut inputs = Vec::with_capacity(draw.textures.len());
        for bound in draw.textures {
            if Some(bound.texture) == target_tex {
                return Err(EngineError::other(format!(
                    "feedback loop: '{}' samples the draw target",
                    bound.name
                )));
            }
            let marker = self.texture_marker(bound.texture).ok_or_else(|| {
                EngineError::other(format!("'{}' bound to destroyed texture", bound.name))
            })?;
            inputs.push(InputRecord {
                name: bound.name.clone(),
                texture: bound.texture,
                marker,
            });
        }

        let geometry_buffer = match draw.geometry {
            scanline_core::Geometry::FullscreenQuad => None,
            scanline_core::Geometry::Buffer { buffer, .. } => {
                if !self.buffers.contains_key(&buffer.0) {
                    return Err(EngineError::other("draw with unknown vertex buffer"));
                }
                Some(buffer)
            }
        };

        let marker = self.marker();
        match target_tex {
            Some(t) => {
                let tex = self.textures.get_mut(&t.0).ok_or_else(|| {
                    EngineError::other(format!("draw into destroyed texture #{}", t.0))
                })?;
                tex.marker = marker;
            }
            None => self.backbuffer_marker = marker,
        }

        self.draws.push(DrawRecord {
            program: draw.program,
            target: draw.target,
            marker,
            inputs,
            uniforms: draw.uniforms.to_vec(),
            geometry_buffer,
        });
        Ok(())
    }

    fn create_surface(&mut self, size: Size, mode: SurfaceMode) -> Result<(), EngineError> {
        self.check_surface(size, mode)?;
        self.surface = Some((size, mode));
        tracing::debug!(
            ?mode,
            width = size.width,
            height = size.height,
            "headless surface created"
        );
        Ok(())
    }

    fn resize_surface(&mut self, size: Size, mode: SurfaceMode) -> Result<(), EngineError> {
        self.check_surface(size, mode)?;
        self.surface = Some((size, mode));
        Ok(())
    }

    fn set_swap_interval(&mut self, interval: i32) {
        self.swap_interval = interval;
        self.interval_log.push(interval);
    }

    fn present(&mut self, allow_tearing: bool) -> Result<(), EngineError> {
        if self.surface.is_none() {
            return Err(EngineError::SurfaceCreation("present without a surface".into()));
        }
        self.presents.push(PresentRecord {
            swap_interval: self.swap_interval,
            allow_tearing,
            marker: self.backbuffer_marker,
        });
        Ok(())
    }

    fn set_max_frame_latency(&mut self, frames: u32) -> Result<u32, EngineError> {
        if !self.caps.frame_latency_wait {
            return Err(EngineError::Unsupported("frame latency limiting"));
        }
        let granted = frames.clamp(1, 16);
        self.max_frame_latency = Some(granted);
        Ok(granted)
    }

    fn wait_frame_latency(&mut self, _timeout: Duration) -> WaitStatus {
        self.latency_waits += 1;
        if self.faults.hung_latency_wait {
            WaitStatus::TimedOut
        } else {
            WaitStatus::Signaled
        }
    }

    fn wait_for_vblank(&mut self) {
        self.vblank_waits += 1;
    }

    fn insert_fence(&mut self) -> Result<FenceHandle, EngineError> {
        if !self.caps.fences {
            return Err(EngineError::Unsupported("gpu fences"));
        }
        let id = self.id();
        self.fences.insert(id);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, _timeout: Duration) -> WaitStatus {
        self.fence_waits += 1;
        if self.faults.hung_fences || !self.fences.contains(&fence.0) {
            WaitStatus::TimedOut
        } else {
            WaitStatus::Signaled
        }
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.fences.remove(&fence.0);
    }

    fn read_backbuffer(&mut self, viewport: Viewport, dst: &mut [u8]) -> Result<(), EngineError> {
        self.backbuffer_pixels(viewport, dst);
        Ok(())
    }

    fn begin_backbuffer_transfer(
        &mut self,
        buffer: BufferHandle,
        viewport: Viewport,
    ) -> Result<(), EngineError> {
        if !self.caps.async_readback {
            return Err(EngineError::Unsupported("async readback"));
        }
        let len = viewport.width as usize * viewport.height as usize * 4;
        let mut pixels = vec![0u8; len];
        self.backbuffer_pixels(viewport, &mut pixels);
        let b = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| EngineError::other("transfer into unknown buffer"))?;
        *b = pixels;
        self.transfers.insert(buffer.0, self.transfer_latency);
        Ok(())
    }

    fn transfer_ready(&mut self, buffer: BufferHandle) -> bool {
        match self.transfers.get_mut(&buffer.0) {
            Some(0) | None => true,
            Some(n) => {
                *n -= 1;
                false
            }
        }
    }

    fn read_transfer(&mut self, buffer: BufferHandle, dst: &mut [u8]) -> Result<(), EngineError> {
        let b = self
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| EngineError::other("read from unknown transfer buffer"))?;
        let n = b.len().min(dst.len());
        dst[..n].copy_from_slice(&b[..n]);
        self.transfers.remove(&buffer.0);
        Ok(())
    }

    fn bind_hw_context(&mut self, owner: ContextOwner) {
        self.owner = owner;
    }
}
