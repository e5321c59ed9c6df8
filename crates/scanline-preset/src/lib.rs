#![forbid(unsafe_code)]

//! scanline preset vocabulary.
//!
//! This crate is **contract-only**: no GPU handles, no backend policy. It describes a shader
//! preset as an ordered list of passes with scale rules, sampling state, history/feedback
//! requirements, LUTs and parameter overrides, and parses that description from
//! `.slangp`-style key/value files or JSON.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod loader;
pub mod params;
pub mod semantics;
pub mod slangp;

use std::collections::HashSet;
use std::path::PathBuf;

use scanline_core::{EngineError, FilterMode, PixelFormat, WrapMode};
use serde::{Deserialize, Serialize};

pub use loader::{FsPresetLoader, PresetLoader};
pub use params::{parse_parameter_pragmas, ParameterDecl};
pub use semantics::{validate_reference, SemanticNames, TextureSemantic, UniformSemantic};

/// Upper bound on the number of passes in one chain.
pub const MAX_PASSES: usize = 64;

/// Deepest `OriginalHistory<n>` a chain may keep.
pub const MAX_HISTORY_DEPTH: usize = 128;

/// Sizing rule for one output axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AxisScale {
    /// Multiple of the previous stage's output on this axis.
    Input(f32),
    /// Multiple of the current viewport on this axis.
    Viewport(f32),
    /// Literal pixel count; `0` falls back to the viewport.
    Absolute(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRule {
    pub x: AxisScale,
    pub y: AxisScale,
}

impl ScaleRule {
    pub fn input(sx: f32, sy: f32) -> Self {
        Self {
            x: AxisScale::Input(sx),
            y: AxisScale::Input(sy),
        }
    }

    pub fn viewport(sx: f32, sy: f32) -> Self {
        Self {
            x: AxisScale::Viewport(sx),
            y: AxisScale::Viewport(sy),
        }
    }

    pub fn absolute(w: u32, h: u32) -> Self {
        Self {
            x: AxisScale::Absolute(w),
            y: AxisScale::Absolute(h),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderRef {
    /// Shader file, resolved against the preset's directory.
    Path(PathBuf),
    /// Inline combined source (`#pragma stage vertex` / `#pragma stage fragment`).
    Source(String),
    /// Built-in passthrough shader.
    Stock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassDesc {
    pub shader: ShaderRef,

    /// `None` lets the chain size the pass (source size, or viewport for the last pass).
    #[serde(default)]
    pub scale: Option<ScaleRule>,

    /// Sampling of this pass's input. `None` uses the chain's default filter.
    #[serde(default)]
    pub filter: Option<FilterMode>,

    #[serde(default)]
    pub wrap: WrapMode,

    #[serde(default)]
    pub mipmap_input: bool,

    #[serde(default)]
    pub float_framebuffer: bool,

    #[serde(default)]
    pub srgb_framebuffer: bool,

    /// `FrameCount` is reported modulo this value when non-zero.
    #[serde(default)]
    pub frame_count_mod: u32,

    #[serde(default)]
    pub alias: Option<String>,

    /// Keep this pass's previous output readable as `PassFeedback[n]`.
    #[serde(default)]
    pub feedback: bool,

    /// Source frames kept for `OriginalHistory[n]`.
    #[serde(default)]
    pub history_depth: u32,
}

impl PassDesc {
    pub fn new(shader: ShaderRef) -> Self {
        Self {
            shader,
            scale: None,
            filter: None,
            wrap: WrapMode::default(),
            mipmap_input: false,
            float_framebuffer: false,
            srgb_framebuffer: false,
            frame_count_mod: 0,
            alias: None,
            feedback: false,
            history_depth: 0,
        }
    }

    pub fn with_scale(mut self, scale: ScaleRule) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn output_format(&self) -> PixelFormat {
        if self.float_framebuffer {
            PixelFormat::Rgba16Float
        } else if self.srgb_framebuffer {
            PixelFormat::Rgba8Srgb
        } else {
            PixelFormat::Rgba8Unorm
        }
    }
}

/// A static lookup texture bound through the `User` semantic or by its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LutDesc {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_lut_filter")]
    pub filter: FilterMode,
    #[serde(default)]
    pub wrap: WrapMode,
    #[serde(default)]
    pub mipmap: bool,
}

fn default_lut_filter() -> FilterMode {
    FilterMode::Linear
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverride {
    pub name: String,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Preset {
    pub passes: Vec<PassDesc>,
    #[serde(default)]
    pub luts: Vec<LutDesc>,
    #[serde(default)]
    pub parameters: Vec<ParameterOverride>,
    /// Directory relative shader and LUT paths resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Preset {
    /// The built-in single-pass passthrough chain.
    pub fn stock() -> Self {
        Self {
            passes: vec![PassDesc::new(ShaderRef::Stock)],
            ..Self::default()
        }
    }

    pub fn is_stock(&self) -> bool {
        self.passes.len() == 1 && self.passes[0].shader == ShaderRef::Stock
    }

    /// Largest declared history depth over all passes.
    pub fn declared_history_depth(&self) -> u32 {
        self.passes
            .iter()
            .map(|p| p.history_depth)
            .max()
            .unwrap_or(0)
    }

    pub fn resolve_path(&self, path: &std::path::Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Structural checks that do not need shader sources.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.passes.is_empty() {
            return Err(EngineError::InvalidPreset("preset has no passes".into()));
        }
        if self.passes.len() > MAX_PASSES {
            return Err(EngineError::InvalidPreset(format!(
                "unsupported pass count {} (max {MAX_PASSES})",
                self.passes.len()
            )));
        }

        let mut names = HashSet::new();
        for (i, pass) in self.passes.iter().enumerate() {
            if pass.history_depth as usize > MAX_HISTORY_DEPTH {
                return Err(EngineError::InvalidPreset(format!(
                    "pass {i}: history depth {} exceeds {MAX_HISTORY_DEPTH}",
                    pass.history_depth
                )));
            }
            if let Some(scale) = &pass.scale {
                for axis in [scale.x, scale.y] {
                    let bad = match axis {
                        AxisScale::Input(s) | AxisScale::Viewport(s) => !(s.is_finite() && s >= 0.0),
                        AxisScale::Absolute(_) => false,
                    };
                    if bad {
                        return Err(EngineError::InvalidPreset(format!(
                            "pass {i}: invalid scale factor"
                        )));
                    }
                }
            }
            if let Some(alias) = &pass.alias {
                if SemanticNames::is_reserved(alias) {
                    return Err(EngineError::InvalidPreset(format!(
                        "pass {i}: alias '{alias}' shadows a built-in semantic"
                    )));
                }
                if !names.insert(alias.as_str()) {
                    return Err(EngineError::InvalidPreset(format!(
                        "pass {i}: duplicate alias '{alias}'"
                    )));
                }
            }
        }
        for lut in &self.luts {
            if SemanticNames::is_reserved(&lut.name) {
                return Err(EngineError::InvalidPreset(format!(
                    "lut '{}' shadows a built-in semantic",
                    lut.name
                )));
            }
            if !names.insert(lut.name.as_str()) {
                return Err(EngineError::InvalidPreset(format!(
                    "duplicate texture name '{}'",
                    lut.name
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self, EngineError> {
        let preset: Preset = serde_json::from_str(text)
            .map_err(|e| EngineError::InvalidPreset(format!("json: {e}")))?;
        preset.validate()?;
        Ok(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_preset_is_single_passthrough() {
        let p = Preset::stock();
        assert!(p.is_stock());
        assert!(p.validate().is_ok());
        assert_eq!(p.passes[0].scale, None);
    }

    #[test]
    fn json_preset_uses_field_defaults() {
        let p = Preset::from_json_str(
            r#"{
                "passes": [
                    { "shader": { "path": "a.slang" },
                      "scale": { "x": { "type": "viewport", "value": 0.5 },
                                 "y": { "type": "viewport", "value": 0.5 } } },
                    { "shader": "stock", "feedback": true, "alias": "Blur" }
                ]
            }"#,
        )
        .expect("json preset");
        assert_eq!(p.passes.len(), 2);
        assert_eq!(p.passes[0].scale, Some(ScaleRule::viewport(0.5, 0.5)));
        assert_eq!(p.passes[0].wrap, WrapMode::ClampToEdge);
        assert!(p.passes[1].feedback);
        assert_eq!(p.passes[1].alias.as_deref(), Some("Blur"));
    }

    #[test]
    fn empty_and_duplicate_alias_presets_are_invalid() {
        assert!(Preset::default().validate().is_err());

        let mut a = PassDesc::new(ShaderRef::Stock);
        a.alias = Some("X".into());
        let p = Preset {
            passes: vec![a.clone(), a],
            ..Preset::default()
        };
        let err = p.validate().expect_err("duplicate alias");
        assert!(err.to_string().contains("duplicate alias"), "got: {err}");
    }

    #[test]
    fn reserved_alias_is_rejected() {
        let mut a = PassDesc::new(ShaderRef::Stock);
        a.alias = Some("Source".into());
        let p = Preset {
            passes: vec![a],
            ..Preset::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn output_format_follows_framebuffer_flags() {
        let mut p = PassDesc::new(ShaderRef::Stock);
        assert_eq!(p.output_format(), PixelFormat::Rgba8Unorm);
        p.srgb_framebuffer = true;
        assert_eq!(p.output_format(), PixelFormat::Rgba8Srgb);
        p.float_framebuffer = true;
        assert_eq!(p.output_format(), PixelFormat::Rgba16Float);
    }

    #[test]
    fn declared_history_depth_is_bounded() {
        let mut deep = PassDesc::new(ShaderRef::Stock);
        deep.history_depth = MAX_HISTORY_DEPTH as u32 + 1;
        let p = Preset {
            passes: vec![deep],
            ..Preset::default()
        };
        let err = p.validate().expect_err("history depth over the limit");
        assert!(err.to_string().contains("history depth"), "got: {err}");
    }
}
