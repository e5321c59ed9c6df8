//! GPU buffer ownership for the frame pipeline.
//!
//! Every render target lives in exactly one [`RenderTargetPool`] entry and is addressed by
//! [`RtId`]. History rings and feedback pairs hold ids, never textures, so rotation and
//! swapping are relabelings of ownership rather than pixel copies.
#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]

pub mod feedback;
pub mod history;
pub mod pool;
pub mod readback;
pub mod scratch;

pub use feedback::FeedbackPair;
pub use history::HistoryRing;
pub use pool::{PoolStats, RenderTarget, RenderTargetPool, RtId, TargetSpec};
pub use readback::{CaptureInfo, CaptureStatus, ReadbackPipeline, DEFAULT_READBACK_SLOTS};
pub use scratch::{ScratchBufferRing, ScratchHandle, DEFAULT_SCRATCH_CAPACITY};
