use scanline_core::{EngineError, VideoBackend};

use crate::pool::{RenderTargetPool, RtId, TargetSpec};

/// A pass output plus its previous-frame copy.
///
/// Semantics:
/// - `write_target()` is what the pass renders into this frame
/// - `read_target()` holds what the pass rendered last frame (`PassFeedback[n]`)
/// - call `swap()` exactly once per frame, before any pass draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackPair {
    rt: RtId,
    feedback: RtId,
}

impl FeedbackPair {
    /// `rt` is the pass's existing output id; the feedback id is reserved alongside it.
    pub fn new(pool: &mut RenderTargetPool, rt: RtId) -> Self {
        Self {
            rt,
            feedback: pool.reserve(),
        }
    }

    pub fn swap(&mut self) {
        core::mem::swap(&mut self.rt, &mut self.feedback);
    }

    pub fn write_target(&self) -> RtId {
        self.rt
    }

    pub fn read_target(&self) -> RtId {
        self.feedback
    }

    /// Bring the feedback half to the pass output's shape. The output half is sized with
    /// the other pass targets.
    pub fn ensure_feedback(
        &self,
        pool: &mut RenderTargetPool,
        backend: &mut dyn VideoBackend,
        spec: TargetSpec,
    ) -> Result<bool, EngineError> {
        pool.ensure(backend, self.feedback, spec)
    }
}
