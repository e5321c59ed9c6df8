//! Multi-pass filter chain.
//
// Per-frame order inside `execute`:
// 1) resize every pass target (bulk, release-then-allocate) if anything size-affecting changed
// 2) rotate history (or reinit it on a source-shape change) and write the source into slot 0
// 3) swap every feedback pair
// 4) rebuild the semantic table and draw each pass in order
//
// Nothing draws before step 1 has completed; a failed allocation drops the frame and the
// resize is retried on the next one.

use std::collections::HashMap;

use scanline_buffers::{FeedbackPair, HistoryRing, PoolStats, RenderTargetPool, RtId, TargetSpec};
use scanline_core::{
    ortho_mvp, DrawTarget, EngineError, FilterMode, Geometry, ImageData, PassDraw, PixelFormat,
    ProgramHandle, Rotation, SessionState, Size, TextureDesc, TextureHandle, VideoBackend,
    Viewport,
};
use scanline_preset::{
    validate_reference, ParameterDecl, PassDesc, Preset, SemanticNames, ShaderRef,
    TextureSemantic, UniformSemantic,
};

use crate::bindings::{PassInputs, Sampling, SemanticBindingTable, TextureBinding};
use crate::compiler::stock_shader;
use crate::scale::{resolve_chain, PassGeometry, RotationPolicy};
use crate::Collaborators;

// -------------------------------------------------------------------------------------------------
// Public vocabulary
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOptions {
    /// Sampling for passes that leave `filter` unset.
    pub default_filter: FilterMode,
    pub rotation: Rotation,
    pub rotation_policy: RotationPolicy,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            default_filter: FilterMode::Linear,
            rotation: Rotation::Deg0,
            rotation_policy: RotationPolicy::default(),
        }
    }
}

/// Per-frame scalars. Mutated once per frame before the passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub frame_count: u64,
    /// `1`, or `-1` while rewinding.
    pub frame_direction: i32,
    pub viewport: Viewport,
    /// `OutputSize` reported by the last pass of the most recent frame.
    pub output_size: Size,
}

impl Default for FrameContext {
    fn default() -> Self {
        Self {
            frame_count: 0,
            frame_direction: 1,
            viewport: Viewport::default(),
            output_size: Size::default(),
        }
    }
}

/// Where the final image of a frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutput {
    /// The last pass drew straight into the backbuffer.
    Backbuffer,
    /// The last pass drew into a chain-owned texture; the caller composites it.
    Texture { texture: TextureHandle, size: Size },
    /// Nothing was drawn (no source yet, or a render target could not be allocated).
    Dropped,
}

// -------------------------------------------------------------------------------------------------
// Internal state
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct InputSource {
    texture: TextureHandle,
    size: Size,
    format: PixelFormat,
}

#[derive(Debug, Clone, Copy)]
enum OutputSlot {
    Target(RtId),
    Feedback(FeedbackPair),
}

impl OutputSlot {
    fn write_id(&self) -> RtId {
        match self {
            OutputSlot::Target(id) => *id,
            OutputSlot::Feedback(pair) => pair.write_target(),
        }
    }

    fn feedback_id(&self) -> Option<RtId> {
        match self {
            OutputSlot::Target(_) => None,
            OutputSlot::Feedback(pair) => Some(pair.read_target()),
        }
    }
}

#[derive(Debug)]
struct Pass {
    desc: PassDesc,
    program: ProgramHandle,
    samplers: Vec<(String, TextureSemantic)>,
    uniforms: Vec<(String, UniformSemantic)>,
    output: OutputSlot,
    geometry: Option<PassGeometry>,
}

impl Pass {
    fn sampling(&self, default_filter: FilterMode) -> Sampling {
        Sampling {
            filter: self.desc.filter.unwrap_or(default_filter),
            wrap: self.desc.wrap,
            mipmap: self.desc.mipmap_input,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Lut {
    texture: TextureHandle,
    size: Size,
    sampling: Sampling,
}

/// How pass `i`'s output is sampled: by the pass that consumes it as `Source`.
fn output_sampling(passes: &[Pass], i: usize, default_filter: FilterMode) -> Sampling {
    passes
        .get(i + 1)
        .or_else(|| passes.get(i))
        .map(|p| p.sampling(default_filter))
        .unwrap_or_default()
}

fn track_reference(
    pass: usize,
    sem: TextureSemantic,
    pass_count: usize,
    lut_count: usize,
    history_depth: &mut usize,
    feedback: &mut [bool],
) -> Result<(), EngineError> {
    validate_reference(pass, sem, pass_count, lut_count).map_err(EngineError::InvalidPreset)?;
    match sem {
        TextureSemantic::OriginalHistory(n) => *history_depth = (*history_depth).max(n),
        TextureSemantic::PassFeedback(n) => feedback[n] = true,
        _ => {}
    }
    Ok(())
}

// -------------------------------------------------------------------------------------------------
// FilterChain
// -------------------------------------------------------------------------------------------------

/// An ordered list of compiled passes plus every GPU resource they need.
///
/// One history ring is shared by the whole chain: it holds past *source* frames, so its
/// depth is the largest depth any pass declares or references.
#[derive(Debug)]
pub struct FilterChain {
    passes: Vec<Pass>,
    luts: Vec<Lut>,
    parameter_decls: Vec<ParameterDecl>,
    parameters: HashMap<String, f32>,
    pool: RenderTargetPool,
    history: Option<HistoryRing>,
    /// Chain-owned copy of the source when there is no history ring.
    frame_target: Option<RtId>,
    source: Option<InputSource>,
    /// The current source already lives in chain-owned storage (history slot 0 or
    /// `frame_target`), sized exactly to the frame.
    source_resident: bool,
    table: SemanticBindingTable,
    frame: FrameContext,
    options: ChainOptions,
    stock: bool,
}

impl FilterChain {
    fn empty(options: ChainOptions, stock: bool) -> Self {
        Self {
            passes: Vec::new(),
            luts: Vec::new(),
            parameter_decls: Vec::new(),
            parameters: HashMap::new(),
            pool: RenderTargetPool::new(),
            history: None,
            frame_target: None,
            source: None,
            source_resident: false,
            table: SemanticBindingTable::new(),
            frame: FrameContext::default(),
            options,
            stock,
        }
    }

    /// Compile every pass of `preset`, resolve its semantic names, and load its LUTs.
    ///
    /// Render targets are sized lazily by the first `execute`. On error every resource
    /// created so far is released.
    pub fn build(
        backend: &mut dyn VideoBackend,
        preset: &Preset,
        options: ChainOptions,
        collab: &Collaborators,
    ) -> Result<Self, EngineError> {
        preset.validate()?;
        let mut chain = Self::empty(options, preset.is_stock());
        if let Err(e) = chain.populate(backend, preset, collab) {
            chain.release(backend);
            return Err(e);
        }
        tracing::info!(
            passes = chain.passes.len(),
            luts = chain.luts.len(),
            history = chain.history_depth(),
            stock = chain.stock,
            "filter chain built"
        );
        Ok(chain)
    }

    /// `build`, falling back to the stock passthrough chain when `preset` is missing or
    /// rejected. Only a failure of the stock chain itself is returned.
    pub fn build_or_stock(
        backend: &mut dyn VideoBackend,
        preset: Option<&Preset>,
        options: ChainOptions,
        collab: &Collaborators,
    ) -> Result<Self, EngineError> {
        if let Some(preset) = preset {
            match Self::build(backend, preset, options, collab) {
                Ok(chain) => return Ok(chain),
                Err(e) => tracing::warn!(error = %e, "shader preset rejected; using stock chain"),
            }
        }
        Self::build(backend, &Preset::stock(), options, collab)
    }

    fn populate(
        &mut self,
        backend: &mut dyn VideoBackend,
        preset: &Preset,
        collab: &Collaborators,
    ) -> Result<(), EngineError> {
        let pass_count = preset.passes.len();
        let lut_count = preset.luts.len();

        let mut reflections = Vec::with_capacity(pass_count);
        for (i, desc) in preset.passes.iter().enumerate() {
            let (text, origin) = match &desc.shader {
                ShaderRef::Path(p) => {
                    let path = preset.resolve_path(p);
                    (collab.presets.read_shader(&path)?, Some(path.display().to_string()))
                }
                ShaderRef::Source(s) => (s.clone(), None),
                ShaderRef::Stock => (stock_shader(), Some("stock".to_string())),
            };
            let compiled = collab
                .compiler
                .compile(backend, i, &text, origin.as_deref())?;
            let output = OutputSlot::Target(self.pool.reserve());
            self.passes.push(Pass {
                desc: desc.clone(),
                program: compiled.program,
                samplers: Vec::new(),
                uniforms: Vec::new(),
                output,
                geometry: None,
            });
            reflections.push(compiled.reflection);
        }

        // Shader defaults first (first declaration wins), then preset overrides.
        for decl in reflections.iter().flat_map(|r| r.parameters.iter()) {
            if !self.parameters.contains_key(&decl.name) {
                self.parameters.insert(decl.name.clone(), decl.default);
                self.parameter_decls.push(decl.clone());
            }
        }
        for o in &preset.parameters {
            if !self.set_parameter(&o.name, o.value) {
                tracing::debug!(name = o.name.as_str(), "preset overrides an undeclared parameter");
            }
        }

        let names = SemanticNames::from_preset(preset)
            .with_parameters(self.parameter_decls.iter().map(|d| d.name.clone()));
        let mut history_depth = preset.declared_history_depth() as usize;
        let mut feedback = vec![false; pass_count];

        for (i, (pass, refl)) in self.passes.iter_mut().zip(&reflections).enumerate() {
            for name in &refl.samplers {
                let sem = names.texture(name).ok_or_else(|| {
                    EngineError::InvalidPreset(format!("pass {i}: unknown texture '{name}'"))
                })?;
                track_reference(i, sem, pass_count, lut_count, &mut history_depth, &mut feedback)?;
                pass.samplers.push((name.clone(), sem));
            }
            for name in &refl.uniforms {
                match names.uniform(name) {
                    Some(sem) => {
                        if let UniformSemantic::TextureSize(t) = sem {
                            track_reference(
                                i,
                                t,
                                pass_count,
                                lut_count,
                                &mut history_depth,
                                &mut feedback,
                            )?;
                        }
                        pass.uniforms.push((name.clone(), sem));
                    }
                    None => tracing::debug!(
                        pass = i,
                        name = name.as_str(),
                        "uniform has no semantic; left at shader default"
                    ),
                }
            }
        }

        for (i, pass) in self.passes.iter_mut().enumerate() {
            if pass.desc.feedback || feedback[i] {
                if let OutputSlot::Target(id) = pass.output {
                    pass.output = OutputSlot::Feedback(FeedbackPair::new(&mut self.pool, id));
                }
            }
        }

        if history_depth > 0 {
            self.history = Some(HistoryRing::new(&mut self.pool, history_depth));
        }

        for lut in &preset.luts {
            let image = collab.images.load(&preset.resolve_path(&lut.path))?;
            let mut desc = TextureDesc::sampled(image.size, PixelFormat::Rgba8Unorm, "lut");
            desc.mipmapped = lut.mipmap;
            let texture = backend.create_texture(&desc)?;
            self.luts.push(Lut {
                texture,
                size: image.size,
                sampling: Sampling {
                    filter: lut.filter,
                    wrap: lut.wrap,
                    mipmap: lut.mipmap,
                },
            });
            backend.upload_texture(texture, &image.as_image_data())?;
            if lut.mipmap {
                backend.generate_mipmaps(texture);
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Per-frame inputs
    // ---------------------------------------------------------------------------------------------

    /// Bind a GPU-resident frame (e.g. a hardware-render target) as this frame's source.
    ///
    /// Only the top-left `size` rect is valid. `execute` copies it into a chain-owned
    /// texture of exactly that size before any pass samples it.
    pub fn set_input_source(
        &mut self,
        texture: TextureHandle,
        size: Size,
        format: PixelFormat,
        state: &mut SessionState,
    ) {
        self.note_source_shape(size, format, state);
        self.source = Some(InputSource {
            texture,
            size,
            format,
        });
        self.source_resident = false;
    }

    /// Upload a software frame into history slot 0 (or the chain's frame texture).
    ///
    /// Allocation failures are returned so the caller can drop the frame; the slot is
    /// retried on the next upload. A failed upload unbinds the previous source, so a
    /// following `Dup` is dropped instead of sampling a released texture.
    pub fn upload_input(
        &mut self,
        backend: &mut dyn VideoBackend,
        image: &ImageData<'_>,
        state: &mut SessionState,
    ) -> Result<(), EngineError> {
        if !image.is_consistent() {
            return Err(EngineError::other(format!(
                "frame {}x{} (pitch {}) does not match its buffer",
                image.size.width, image.size.height, image.pitch
            )));
        }
        self.note_source_shape(image.size, image.format, state);
        self.source = None;
        self.source_resident = false;
        let spec = TargetSpec::new(image.size, image.format);

        let id = match self.stage_source(backend, spec, state) {
            Ok(id) => id,
            Err(e) => {
                if e.is_allocation() && self.history.is_some() {
                    state.history_needs_init = true;
                }
                return Err(e);
            }
        };
        let texture = self
            .pool
            .texture(id)
            .ok_or_else(|| EngineError::other("frame texture missing after allocation"))?;
        backend.upload_texture(texture, image)?;

        self.source = Some(InputSource {
            texture,
            size: image.size,
            format: image.format,
        });
        self.source_resident = true;
        Ok(())
    }

    /// Chain-owned slot for the next source: history slot 0, else the frame texture.
    fn stage_source(
        &mut self,
        backend: &mut dyn VideoBackend,
        spec: TargetSpec,
        state: &mut SessionState,
    ) -> Result<RtId, EngineError> {
        if self.history.is_some() {
            return self.advance_history(backend, spec, state);
        }
        let id = match self.frame_target {
            Some(id) => id,
            None => {
                let id = self.pool.reserve();
                self.frame_target = Some(id);
                id
            }
        };
        self.pool.ensure(backend, id, spec)?;
        Ok(id)
    }

    pub fn set_frame_context(&mut self, frame_count: u64, frame_direction: i32) {
        self.frame.frame_count = frame_count;
        self.frame.frame_direction = frame_direction;
    }

    /// Store the viewport; a size change schedules a chain resize.
    pub fn set_viewport(&mut self, viewport: Viewport, state: &mut SessionState) {
        if self.frame.viewport.size() != viewport.size() {
            state.viewport_changed();
        }
        self.frame.viewport = viewport;
    }

    pub fn set_rotation(&mut self, rotation: Rotation, state: &mut SessionState) {
        if self.options.rotation != rotation {
            self.options.rotation = rotation;
            state.viewport_changed();
        }
    }

    /// Set a shader parameter, clamped to its declared range. Returns `false` for names no
    /// pass declares.
    pub fn set_parameter(&mut self, name: &str, value: f32) -> bool {
        let Some(decl) = self.parameter_decls.iter().find(|d| d.name == name) else {
            return false;
        };
        self.parameters.insert(name.to_string(), decl.clamp(value));
        true
    }

    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.parameters.get(name).copied()
    }

    pub fn parameter_decls(&self) -> &[ParameterDecl] {
        &self.parameter_decls
    }

    fn note_source_shape(&self, size: Size, format: PixelFormat, state: &mut SessionState) {
        if let Some(prev) = self.source {
            if prev.size != size || prev.format != format {
                tracing::debug!(
                    width = size.width,
                    height = size.height,
                    ?format,
                    "frame source changed shape"
                );
                state.source_changed();
            }
        }
    }

    /// Rotate history (or reinit it at `spec`) and return slot 0.
    fn advance_history(
        &mut self,
        backend: &mut dyn VideoBackend,
        spec: TargetSpec,
        state: &mut SessionState,
    ) -> Result<RtId, EngineError> {
        let ring = self
            .history
            .as_mut()
            .ok_or_else(|| EngineError::other("chain has no history ring"))?;
        if state.take_history_init() || ring.spec() != Some(spec) {
            ring.reinit(&mut self.pool, backend, spec)?;
        } else {
            ring.rotate();
        }
        Ok(ring.current())
    }

    // ---------------------------------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------------------------------

    /// Run every pass for the current source into `viewport`.
    pub fn execute(
        &mut self,
        backend: &mut dyn VideoBackend,
        viewport: Viewport,
        state: &mut SessionState,
    ) -> Result<ChainOutput, EngineError> {
        self.set_viewport(viewport, state);
        let Some(source) = self.source else {
            tracing::debug!("no frame source bound; skipping chain");
            return Ok(ChainOutput::Dropped);
        };
        if self.passes.is_empty() {
            return Ok(ChainOutput::Dropped);
        }

        // 1) Resize.
        let chain_resize = state.take_resize_chain();
        let target_resize = state.take_resize_targets();
        let has_unsized = self.passes.iter().any(|p| p.geometry.is_none());
        if chain_resize || target_resize || has_unsized {
            match self.resize_targets(backend, source.size) {
                Ok(()) => {}
                Err(e) if e.is_allocation() => {
                    tracing::warn!(error = %e, "render target allocation failed; dropping frame");
                    state.resize_targets_pending = true;
                    return Ok(ChainOutput::Dropped);
                }
                Err(e) => return Err(e),
            }
        }

        // 2) History. An external source is copied in at its valid size.
        let original = if self.source_resident {
            source.texture
        } else {
            let spec = TargetSpec::new(source.size, source.format);
            let slot = match self.stage_source(backend, spec, state) {
                Ok(id) => id,
                Err(e) if e.is_allocation() => {
                    tracing::warn!(error = %e, "frame source allocation failed; dropping frame");
                    if self.history.is_some() {
                        state.history_needs_init = true;
                    }
                    return Ok(ChainOutput::Dropped);
                }
                Err(e) => return Err(e),
            };
            let Some(staged) = self.pool.texture(slot) else {
                tracing::warn!("frame source slot not allocated; dropping frame");
                return Ok(ChainOutput::Dropped);
            };
            backend.copy_texture(source.texture, staged, source.size)?;
            self.source = Some(InputSource {
                texture: staged,
                ..source
            });
            self.source_resident = true;
            staged
        };

        // 3) Feedback.
        for pass in &mut self.passes {
            if let OutputSlot::Feedback(pair) = &mut pass.output {
                pair.swap();
            }
        }

        // 4) Draw.
        self.bind_frame_resources(original, source.size);
        self.draw_passes(backend, viewport)
    }

    fn resize_targets(
        &mut self,
        backend: &mut dyn VideoBackend,
        source_size: Size,
    ) -> Result<(), EngineError> {
        let scales: Vec<_> = self.passes.iter().map(|p| p.desc.scale).collect();
        let geometry = resolve_chain(
            &scales,
            source_size,
            self.frame.viewport.size(),
            self.options.rotation,
            self.options.rotation_policy,
        );

        let mut requests = Vec::new();
        let mut unused = Vec::new();
        for (i, mut g) in geometry.into_iter().enumerate() {
            let output = self.passes[i].output;
            // A feedback pass must be readable next frame, so it never targets the backbuffer.
            if g.to_backbuffer && output.feedback_id().is_some() {
                g.to_backbuffer = false;
                g.output_size = g.target;
            }
            let mipmapped = self
                .passes
                .get(i + 1)
                .is_some_and(|next| next.desc.mipmap_input);
            let spec =
                TargetSpec::new(g.target, self.passes[i].desc.output_format()).mipmapped(mipmapped);
            for id in [Some(output.write_id()), output.feedback_id()]
                .into_iter()
                .flatten()
            {
                if g.to_backbuffer {
                    unused.push(id);
                } else {
                    requests.push((id, spec));
                }
            }
            self.passes[i].geometry = Some(g);
        }

        for id in unused {
            self.pool.release(backend, id);
        }
        let changed = self.pool.resize_bulk(backend, &requests)?;
        tracing::debug!(
            viewport_w = self.frame.viewport.width,
            viewport_h = self.frame.viewport.height,
            recreated = changed.len(),
            "chain targets resized"
        );
        Ok(())
    }

    fn bind_frame_resources(&mut self, original: TextureHandle, source_size: Size) {
        let default_filter = self.options.default_filter;
        let first = self
            .passes
            .first()
            .map(|p| p.sampling(default_filter))
            .unwrap_or_default();

        self.table.clear();
        self.table.bind(
            TextureSemantic::Original,
            TextureBinding {
                texture: original,
                size: source_size,
                sampling: first,
            },
        );
        if let Some(ring) = &self.history {
            let size = ring.spec().map_or(source_size, |s| s.size);
            for n in 1..=ring.depth() {
                if let Some(texture) = ring.slot(n).and_then(|id| self.pool.texture(id)) {
                    self.table.bind(
                        TextureSemantic::OriginalHistory(n),
                        TextureBinding {
                            texture,
                            size,
                            sampling: first,
                        },
                    );
                }
            }
        }
        for (i, lut) in self.luts.iter().enumerate() {
            self.table.bind(
                TextureSemantic::User(i),
                TextureBinding {
                    texture: lut.texture,
                    size: lut.size,
                    sampling: lut.sampling,
                },
            );
        }
        for (i, pass) in self.passes.iter().enumerate() {
            let Some(rt) = pass.output.feedback_id().and_then(|id| self.pool.get(id)) else {
                continue;
            };
            self.table.bind(
                TextureSemantic::PassFeedback(i),
                TextureBinding {
                    texture: rt.texture,
                    size: rt.size(),
                    sampling: output_sampling(&self.passes, i, default_filter),
                },
            );
        }
    }

    fn draw_passes(
        &mut self,
        backend: &mut dyn VideoBackend,
        viewport: Viewport,
    ) -> Result<ChainOutput, EngineError> {
        let default_filter = self.options.default_filter;
        let final_viewport = viewport.size();
        let mut source = *self
            .table
            .get(TextureSemantic::Original)
            .ok_or_else(|| EngineError::other("Original is not bound"))?;
        let mut output = ChainOutput::Dropped;

        for i in 0..self.passes.len() {
            let pass = &self.passes[i];
            let geometry = pass
                .geometry
                .ok_or_else(|| EngineError::other(format!("pass {i} has no resolved size")))?;
            let sampling = pass.sampling(default_filter);

            self.table.bind(
                TextureSemantic::Source,
                TextureBinding { sampling, ..source },
            );
            if pass.desc.mipmap_input {
                backend.generate_mipmaps(source.texture);
            }

            let (target, mvp) = if geometry.to_backbuffer {
                (DrawTarget::Backbuffer(viewport), ortho_mvp(self.options.rotation))
            } else {
                let rt = self.pool.get(pass.output.write_id()).ok_or_else(|| {
                    EngineError::other(format!("pass {i} output is not allocated"))
                })?;
                (rt.draw_target(), ortho_mvp(Rotation::Deg0))
            };

            let frame_count = match pass.desc.frame_count_mod {
                0 => self.frame.frame_count,
                m => self.frame.frame_count % u64::from(m),
            } as u32;
            let inputs = PassInputs {
                mvp,
                output_size: geometry.output_size,
                final_viewport,
                frame_count,
                frame_direction: self.frame.frame_direction,
                parameters: &self.parameters,
                sampling,
            };
            let (textures, uniforms) = self.table.resolve(&pass.samplers, &pass.uniforms, &inputs);
            backend.draw(&PassDraw {
                program: pass.program,
                target,
                textures: &textures,
                uniforms: &uniforms,
                geometry: Geometry::FullscreenQuad,
                clear: None,
                blend: false,
            })?;

            output = match target {
                DrawTarget::Texture { texture, size } => {
                    let binding = TextureBinding {
                        texture,
                        size,
                        sampling: output_sampling(&self.passes, i, default_filter),
                    };
                    self.table.bind(TextureSemantic::PassOutput(i), binding);
                    source = binding;
                    ChainOutput::Texture { texture, size }
                }
                DrawTarget::Backbuffer(_) => ChainOutput::Backbuffer,
            };
            self.frame.output_size = geometry.output_size;
        }
        Ok(output)
    }

    // ---------------------------------------------------------------------------------------------
    // Teardown + inspection
    // ---------------------------------------------------------------------------------------------

    /// Destroy every program, LUT and render target the chain owns.
    pub fn release(&mut self, backend: &mut dyn VideoBackend) {
        for pass in self.passes.drain(..) {
            backend.destroy_program(pass.program);
        }
        for lut in self.luts.drain(..) {
            backend.destroy_texture(lut.texture);
        }
        self.pool.release_all(backend);
        self.history = None;
        self.frame_target = None;
        self.source = None;
        self.source_resident = false;
        self.table.clear();
    }

    pub fn is_stock(&self) -> bool {
        self.stock
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn history_depth(&self) -> usize {
        self.history.as_ref().map_or(0, HistoryRing::depth)
    }

    /// History textures in frames-ago order (index 0 is the current source).
    pub fn history_textures(&self) -> Vec<TextureHandle> {
        self.history
            .as_ref()
            .map(|ring| {
                ring.ids()
                    .iter()
                    .filter_map(|id| self.pool.texture(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Size pass `i` renders at (its target, or the viewport for a backbuffer pass).
    pub fn pass_output_size(&self, i: usize) -> Option<Size> {
        self.passes.get(i)?.geometry.map(|g| g.target)
    }

    pub fn pass_targets_backbuffer(&self, i: usize) -> Option<bool> {
        self.passes.get(i)?.geometry.map(|g| g.to_backbuffer)
    }

    /// Texture pass `i` wrote (or will write) this frame.
    pub fn pass_output_texture(&self, i: usize) -> Option<TextureHandle> {
        self.pool.texture(self.passes.get(i)?.output.write_id())
    }

    /// Texture holding pass `i`'s previous-frame output.
    pub fn feedback_texture(&self, i: usize) -> Option<TextureHandle> {
        self.pool.texture(self.passes.get(i)?.output.feedback_id()?)
    }

    pub fn has_feedback(&self, i: usize) -> bool {
        self.passes
            .get(i)
            .is_some_and(|p| p.output.feedback_id().is_some())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn frame_context(&self) -> FrameContext {
        self.frame
    }

    pub fn options(&self) -> ChainOptions {
        self.options
    }
}
