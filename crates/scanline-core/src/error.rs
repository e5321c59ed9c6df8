use std::path::PathBuf;
use std::time::Duration;

/// Engine-level errors used across scanline crates.
///
/// Contract rule: this type lives in `scanline-core` and is re-exported by runtimes.
/// Components absorb recoverable variants at their own boundary and log them; only the
/// variants for which [`EngineError::is_fatal`] returns `true` reach the frontend.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ---- Config / presets (frontend-level) ----
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json parse error at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config at {}: {msg}", path.display())]
    InvalidConfig { path: PathBuf, msg: String },

    #[error("preset parse error at line {line}: {msg}")]
    PresetParse { line: usize, msg: String },

    #[error("invalid preset: {0}")]
    InvalidPreset(String),

    #[error("image decode error at {}: {msg}", path.display())]
    ImageDecode { path: PathBuf, msg: String },

    // ---- Shader programs ----
    #[error("shader compile error in pass {pass}: {msg}")]
    ShaderCompile { pass: usize, msg: String },

    #[error("vertex shader compile error: {0}")]
    VertexCompile(String),

    #[error("fragment shader compile error: {0}")]
    FragmentCompile(String),

    #[error("program link error: {0}")]
    Link(String),

    // ---- Backend resources ----
    #[error("backend object creation failed: {0}")]
    BackendCreate(String),

    #[error("allocation failed for {what} ({width}x{height})")]
    Allocation {
        what: &'static str,
        width: u32,
        height: u32,
    },

    #[error("unsupported by backend: {0}")]
    Unsupported(&'static str),

    // ---- Fatal ----
    #[error("presentation surface creation failed: {0}")]
    SurfaceCreation(String),

    #[error("gpu wait on {what} timed out after {timeout:?}")]
    GpuTimeout { what: &'static str, timeout: Duration },

    #[error("graphics context ownership violated: {0}")]
    ContextOwnership(&'static str),

    // ---- Fallback ----
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }

    /// `true` for errors that must propagate to the owning frontend.
    ///
    /// Everything else is recoverable: the component that hit it degrades (stock chain,
    /// dropped frame, clamped size) and reports through the log.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::SurfaceCreation(_)
                | EngineError::GpuTimeout { .. }
                | EngineError::ContextOwnership(_)
        )
    }

    /// `true` for resource-exhaustion errors that should drop the current frame and retry.
    pub fn is_allocation(&self) -> bool {
        matches!(self, EngineError::Allocation { .. })
    }
}
