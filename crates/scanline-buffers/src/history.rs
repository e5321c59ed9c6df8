use scanline_core::{EngineError, VideoBackend};

use crate::pool::{RenderTargetPool, RtId, TargetSpec};

/// Ring of past source frames addressed by "frames ago".
///
/// Holds `depth + 1` pool ids. Slot 0 is the current frame's source. Rotation moves the
/// oldest id to slot 0 and shifts the rest up by one; no pixels move.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    slots: Vec<RtId>,
    spec: Option<TargetSpec>,
}

impl HistoryRing {
    pub fn new(pool: &mut RenderTargetPool, depth: usize) -> Self {
        let slots = (0..=depth).map(|_| pool.reserve()).collect();
        Self { slots, spec: None }
    }

    pub fn depth(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Shape every slot currently has, if initialised.
    pub fn spec(&self) -> Option<TargetSpec> {
        self.spec
    }

    /// Relabel the oldest slot as slot 0. The caller then writes the new source into it.
    pub fn rotate(&mut self) {
        self.slots.rotate_right(1);
    }

    /// Reinitialise every slot at `spec` (release-then-allocate in bulk). No partial-size
    /// history survives this call.
    pub fn reinit(
        &mut self,
        pool: &mut RenderTargetPool,
        backend: &mut dyn VideoBackend,
        spec: TargetSpec,
    ) -> Result<(), EngineError> {
        self.spec = None;
        let requests: Vec<(RtId, TargetSpec)> = self.slots.iter().map(|id| (*id, spec)).collect();
        pool.resize_bulk(backend, &requests)?;
        // Same-size slots keep stale frames; clear them so no previous-source content leaks.
        for id in &self.slots {
            if let Some(rt) = pool.get(*id) {
                backend.clear(rt.draw_target(), [0.0, 0.0, 0.0, 1.0]);
            }
        }
        self.spec = Some(spec);
        tracing::debug!(
            slots = self.slots.len(),
            width = spec.size.width,
            height = spec.size.height,
            "history reinitialised"
        );
        Ok(())
    }

    /// Pool id holding the source from `frames_ago` frames back.
    pub fn slot(&self, frames_ago: usize) -> Option<RtId> {
        self.slots.get(frames_ago).copied()
    }

    pub fn current(&self) -> RtId {
        self.slots[0]
    }

    pub fn ids(&self) -> &[RtId] {
        &self.slots
    }
}
