//! scanline runtime (backend-agnostic frame pipeline)
//
// This crate drives everything above the graphics API:
// - the multi-pass filter chain and its per-frame semantic bindings
// - presentation pacing (swap interval, latency, black frames, hard sync)
// - hardware-render interop and the cross-reinit context cache
// - the `Pipeline` orchestrator tying them to one `VideoBackend`
//
// Shader text, presets and LUT images come in through the `Collaborators` seams.
#![deny(missing_debug_implementations)]

pub mod bindings;
pub mod chain;
pub mod compiler;
pub mod context_cache;
pub mod hw_render;
pub mod lut;
pub mod pipeline;
pub mod present;
pub mod scale;

pub use scanline_core::EngineError;

pub use bindings::{PassInputs, Sampling, SemanticBindingTable, TextureBinding};
pub use chain::{ChainOptions, ChainOutput, FilterChain, FrameContext};
pub use compiler::{
    split_stages, stock_shader, CompiledPass, GlslCompiler, Reflection, ShaderCompiler,
    STOCK_FRAG, STOCK_VERT,
};
pub use context_cache::ContextCache;
pub use hw_render::{HwRenderBridge, HwRenderInterface, HwRenderRequest};
pub use lut::{ImageCrateLoader, ImageLoader};
pub use pipeline::{Frame, FrameOutcome, Overlay, Pipeline};
pub use present::{PresentConfig, PresentationScheduler, SwapchainState, GPU_WAIT_TIMEOUT, MAX_FENCES};
pub use scale::{resolve_chain, PassGeometry, RotationPolicy};

use scanline_preset::{FsPresetLoader, PresetLoader};

/// External services the chain depends on: shader compilation, preset/shader-text loading
/// and LUT image decoding.
pub struct Collaborators {
    pub compiler: Box<dyn ShaderCompiler>,
    pub presets: Box<dyn PresetLoader>,
    pub images: Box<dyn ImageLoader>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            compiler: Box::new(GlslCompiler),
            presets: Box::new(FsPresetLoader),
            images: Box::new(ImageCrateLoader),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The collaborator traits are object-safe seams without a Debug bound.
        f.debug_struct("Collaborators")
            .field("compiler", &"<dyn ShaderCompiler>")
            .field("presets", &"<dyn PresetLoader>")
            .field("images", &"<dyn ImageLoader>")
            .finish()
    }
}
