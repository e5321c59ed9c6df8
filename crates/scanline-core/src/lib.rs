#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

//! Shared vocabulary for the scanline frame pipeline: errors, geometry, configuration,
//! session state and the [`VideoBackend`] trait every graphics backend implements.

pub mod backend;
pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use backend::{
    AttachmentHandle, BackendCaps, BoundTexture, BoundUniform, BufferHandle, ContextOwner,
    DrawTarget, FenceHandle, Geometry, GraphicsApi, NativeHandles, PassDraw, ProgramHandle,
    ShaderSource, SurfaceMode, TextureDesc, TextureHandle, TextureUsage, UniformValue,
    VideoBackend, WaitStatus,
};
pub use config::{load_typed_json, VideoSettings};
pub use error::EngineError;
pub use state::SessionState;
pub use types::{
    mat4_mul, ortho_mvp, DecodedImage, FilterMode, ImageData, Mat4, PixelFormat, Rotation, Size,
    Viewport, WrapMode, IDENTITY_MVP,
};
