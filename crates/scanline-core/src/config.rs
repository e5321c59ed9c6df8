use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::types::Rotation;

/// Video-pipeline settings as persisted by the frontend.
///
/// Every field has a default so partial JSON files load cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "default_true")]
    pub vsync: bool,

    /// Vblanks per present while vsync is on (1..=4).
    #[serde(default = "default_swap_interval")]
    pub swap_interval: u32,

    /// Request a tear-allowed interval when `swap_interval == 1`.
    #[serde(default)]
    pub adaptive_vsync: bool,

    /// Frames the presentation queue may hold. `0` means "1 plus wait-for-vblank".
    #[serde(default = "default_max_frame_latency")]
    pub max_frame_latency: u32,

    /// Prefer a waitable (latency-limited) presentation surface when available.
    #[serde(default)]
    pub waitable_swapchain: bool,

    #[serde(default)]
    pub hard_sync: bool,

    /// Frames the CPU may run ahead of GPU completion while `hard_sync` is set (0..=3).
    #[serde(default)]
    pub hard_sync_frames: u32,

    /// Extra black frames presented after each real frame.
    #[serde(default)]
    pub black_frame_insertion: u32,

    /// Capture every presented frame through the async readback ring.
    #[serde(default)]
    pub gpu_record: bool,

    #[serde(default = "default_readback_slots")]
    pub readback_slots: usize,

    #[serde(default = "default_scratch_buffers")]
    pub scratch_buffers: usize,

    /// Linear filtering for the stock chain and passes without an explicit filter.
    #[serde(default = "default_true")]
    pub smooth: bool,

    #[serde(default)]
    pub rotation: Rotation,

    #[serde(default)]
    pub shader_preset: Option<PathBuf>,

    /// Keep the backend alive across a driver teardown/recreate cycle.
    #[serde(default)]
    pub cache_context: bool,
}

fn default_true() -> bool {
    true
}
fn default_swap_interval() -> u32 {
    1
}
fn default_max_frame_latency() -> u32 {
    1
}
fn default_readback_slots() -> usize {
    4
}
fn default_scratch_buffers() -> usize {
    256
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            swap_interval: default_swap_interval(),
            adaptive_vsync: false,
            max_frame_latency: default_max_frame_latency(),
            waitable_swapchain: false,
            hard_sync: false,
            hard_sync_frames: 0,
            black_frame_insertion: 0,
            gpu_record: false,
            readback_slots: default_readback_slots(),
            scratch_buffers: default_scratch_buffers(),
            smooth: true,
            rotation: Rotation::Deg0,
            shader_preset: None,
            cache_context: false,
        }
    }
}

impl VideoSettings {
    pub fn load_from(path: &Path) -> Result<Self, EngineError> {
        let settings: VideoSettings = load_typed_json(path)?;
        settings.validate().map_err(|msg| EngineError::InvalidConfig {
            path: path.to_path_buf(),
            msg,
        })?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=4).contains(&self.swap_interval) {
            return Err(format!(
                "swap_interval must be in 1..=4 (got {})",
                self.swap_interval
            ));
        }
        if self.hard_sync_frames > 3 {
            return Err(format!(
                "hard_sync_frames must be <= 3 (got {})",
                self.hard_sync_frames
            ));
        }
        if self.readback_slots == 0 {
            return Err("readback_slots must be >= 1".into());
        }
        if self.scratch_buffers == 0 {
            return Err("scratch_buffers must be >= 1".into());
        }
        if self.max_frame_latency > 16 {
            return Err(format!(
                "max_frame_latency must be <= 16 (got {})",
                self.max_frame_latency
            ));
        }
        Ok(())
    }
}

/// Read and deserialize a JSON file into `T`.
pub fn load_typed_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let text = fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| EngineError::Json {
        path: path.to_path_buf(),
        source,
    })
}
