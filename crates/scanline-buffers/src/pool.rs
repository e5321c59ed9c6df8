use scanline_core::{
    DrawTarget, EngineError, PixelFormat, Size, TextureDesc, TextureHandle, TextureUsage,
    VideoBackend,
};

/// Stable index of a render-target entry. The backing texture behind an id changes on
/// resize; the id does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RtId(usize);

impl RtId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Shape of a render target. Two targets with equal specs are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSpec {
    pub size: Size,
    pub format: PixelFormat,
    pub mipmapped: bool,
}

impl TargetSpec {
    pub fn new(size: Size, format: PixelFormat) -> Self {
        Self {
            size,
            format,
            mipmapped: false,
        }
    }

    pub fn mipmapped(mut self, on: bool) -> Self {
        self.mipmapped = on;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub texture: TextureHandle,
    pub spec: TargetSpec,
    pub usage: TextureUsage,
}

impl RenderTarget {
    pub fn size(&self) -> Size {
        self.spec.size
    }

    pub fn draw_target(&self) -> DrawTarget {
        DrawTarget::Texture {
            texture: self.texture,
            size: self.spec.size,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub allocations: u64,
    pub releases: u64,
    pub live: usize,
}

/// Allocation/resize/release policy for every render target in a chain.
///
/// - `ensure` is a no-op when the spec is unchanged.
/// - recreation is always release-then-allocate, never an in-place resize.
/// - `resize_bulk` releases every changing target before allocating any of them.
/// - fresh targets are cleared to black so first-frame sampling is defined.
#[derive(Debug, Default)]
pub struct RenderTargetPool {
    entries: Vec<Option<RenderTarget>>,
    stats: PoolStats,
}

impl RenderTargetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// New id with no backing texture yet.
    pub fn reserve(&mut self) -> RtId {
        self.entries.push(None);
        RtId(self.entries.len() - 1)
    }

    /// New id backed by a freshly allocated target.
    pub fn allocate(
        &mut self,
        backend: &mut dyn VideoBackend,
        spec: TargetSpec,
    ) -> Result<RtId, EngineError> {
        let id = self.reserve();
        self.ensure(backend, id, spec)?;
        Ok(id)
    }

    pub fn get(&self, id: RtId) -> Option<&RenderTarget> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    pub fn texture(&self, id: RtId) -> Option<TextureHandle> {
        self.get(id).map(|rt| rt.texture)
    }

    pub fn size(&self, id: RtId) -> Option<Size> {
        self.get(id).map(RenderTarget::size)
    }

    pub fn matches(&self, id: RtId, spec: TargetSpec) -> bool {
        self.get(id).is_some_and(|rt| rt.spec == spec)
    }

    /// Make `id` match `spec`. Returns `true` when the backing texture was recreated.
    pub fn ensure(
        &mut self,
        backend: &mut dyn VideoBackend,
        id: RtId,
        spec: TargetSpec,
    ) -> Result<bool, EngineError> {
        if self.matches(id, spec) {
            return Ok(false);
        }
        self.release(backend, id);
        self.create(backend, id, spec)?;
        Ok(true)
    }

    /// Apply many `ensure`s with bulk ordering. Returns the ids that were recreated.
    ///
    /// On an allocation failure the remaining requested ids are left released; a later
    /// call with the same requests retries them.
    pub fn resize_bulk(
        &mut self,
        backend: &mut dyn VideoBackend,
        requests: &[(RtId, TargetSpec)],
    ) -> Result<Vec<RtId>, EngineError> {
        let changed: Vec<(RtId, TargetSpec)> = requests
            .iter()
            .copied()
            .filter(|(id, spec)| !self.matches(*id, *spec))
            .collect();
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        for (id, _) in &changed {
            self.release(backend, *id);
        }
        for (id, spec) in &changed {
            // The same id may be requested twice; the first allocation wins.
            if self.get(*id).is_none() {
                self.create(backend, *id, *spec)?;
            }
        }
        tracing::debug!(count = changed.len(), "render targets reallocated");
        Ok(changed.into_iter().map(|(id, _)| id).collect())
    }

    /// Drop the backing texture; the id stays valid for a later `ensure`.
    pub fn release(&mut self, backend: &mut dyn VideoBackend, id: RtId) {
        if let Some(rt) = self.entries.get_mut(id.0).and_then(Option::take) {
            backend.destroy_texture(rt.texture);
            self.stats.releases += 1;
            self.stats.live -= 1;
        }
    }

    /// Release everything and forget all ids (chain teardown).
    pub fn release_all(&mut self, backend: &mut dyn VideoBackend) {
        for i in 0..self.entries.len() {
            self.release(backend, RtId(i));
        }
        self.entries.clear();
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    fn create(
        &mut self,
        backend: &mut dyn VideoBackend,
        id: RtId,
        spec: TargetSpec,
    ) -> Result<(), EngineError> {
        if spec.size.is_empty() {
            return Err(EngineError::Allocation {
                what: "render target",
                width: spec.size.width,
                height: spec.size.height,
            });
        }
        let mut desc = TextureDesc::render_target(spec.size, spec.format, "render target");
        desc.mipmapped = spec.mipmapped;
        let texture = backend.create_texture(&desc)?;
        let rt = RenderTarget {
            texture,
            spec,
            usage: desc.usage,
        };
        backend.clear(rt.draw_target(), [0.0, 0.0, 0.0, 1.0]);

        match self.entries.get_mut(id.0) {
            Some(slot) => *slot = Some(rt),
            None => {
                backend.destroy_texture(texture);
                return Err(EngineError::other(format!("unknown render target id {}", id.0)));
            }
        }
        self.stats.allocations += 1;
        self.stats.live += 1;
        Ok(())
    }
}
