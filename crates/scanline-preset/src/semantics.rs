//! Semantic name vocabulary.
//!
//! Shaders refer to chain resources by name. This module maps those names to typed
//! semantics; the runtime maps semantics to live textures and values each frame.
//!
//! Naming conventions:
//! - textures: `Original`, `Source`, `OriginalHistory<n>`, `PassOutput<n>`,
//!   `PassFeedback<n>`, `User<n>`, a pass alias, `<alias>Feedback`, or a LUT name
//! - sizes: `<texture name>Size` is `(w, h, 1/w, 1/h)` of that texture
//! - scalars: `MVP`, `OutputSize`, `FinalViewportSize`, `FrameCount`, `FrameDirection`

use crate::{Preset, MAX_HISTORY_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureSemantic {
    /// The unfiltered frame from the core (history slot 0).
    Original,
    /// Output of the previous pass (`Original` for pass 0).
    Source,
    /// Source frame `n` frames ago; `OriginalHistory(0)` is `Original`.
    OriginalHistory(usize),
    PassOutput(usize),
    PassFeedback(usize),
    /// LUT by declaration index.
    User(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UniformSemantic {
    Mvp,
    OutputSize,
    FinalViewportSize,
    FrameCount,
    FrameDirection,
    TextureSize(TextureSemantic),
    Parameter(String),
}

const SCALARS: &[(&str, UniformSemantic)] = &[
    ("MVP", UniformSemantic::Mvp),
    ("OutputSize", UniformSemantic::OutputSize),
    ("FinalViewportSize", UniformSemantic::FinalViewportSize),
    ("FrameCount", UniformSemantic::FrameCount),
    ("FrameDirection", UniformSemantic::FrameDirection),
];

const INDEXED: &[&str] = &["OriginalHistory", "PassOutput", "PassFeedback", "User"];

/// Name resolver for one preset (built-in names plus aliases, LUT names and parameters).
#[derive(Debug, Clone, Default)]
pub struct SemanticNames {
    aliases: Vec<Option<String>>,
    luts: Vec<String>,
    parameters: Vec<String>,
}

impl SemanticNames {
    pub fn from_preset(preset: &Preset) -> Self {
        Self {
            aliases: preset.passes.iter().map(|p| p.alias.clone()).collect(),
            luts: preset.luts.iter().map(|l| l.name.clone()).collect(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters<I: IntoIterator<Item = String>>(mut self, names: I) -> Self {
        self.parameters.extend(names);
        self
    }

    /// `true` if user-chosen names (aliases, LUTs) may not use `name`.
    pub fn is_reserved(name: &str) -> bool {
        if matches!(name, "Original" | "Source") || SCALARS.iter().any(|(n, _)| *n == name) {
            return true;
        }
        INDEXED
            .iter()
            .any(|prefix| parse_index(name, prefix).is_some())
    }

    pub fn texture(&self, name: &str) -> Option<TextureSemantic> {
        match name {
            "Original" => return Some(TextureSemantic::Original),
            "Source" => return Some(TextureSemantic::Source),
            _ => {}
        }
        if let Some(n) = parse_index(name, "OriginalHistory") {
            return Some(if n == 0 {
                TextureSemantic::Original
            } else {
                TextureSemantic::OriginalHistory(n)
            });
        }
        if let Some(n) = parse_index(name, "PassOutput") {
            return Some(TextureSemantic::PassOutput(n));
        }
        if let Some(n) = parse_index(name, "PassFeedback") {
            return Some(TextureSemantic::PassFeedback(n));
        }
        if let Some(n) = parse_index(name, "User") {
            return Some(TextureSemantic::User(n));
        }
        if let Some(i) = self.alias_index(name) {
            return Some(TextureSemantic::PassOutput(i));
        }
        if let Some(base) = name.strip_suffix("Feedback") {
            if let Some(i) = self.alias_index(base) {
                return Some(TextureSemantic::PassFeedback(i));
            }
        }
        self.luts
            .iter()
            .position(|l| l == name)
            .map(TextureSemantic::User)
    }

    pub fn uniform(&self, name: &str) -> Option<UniformSemantic> {
        if let Some((_, s)) = SCALARS.iter().find(|(n, _)| *n == name) {
            return Some(s.clone());
        }
        if self.parameters.iter().any(|p| p == name) {
            return Some(UniformSemantic::Parameter(name.to_string()));
        }
        name.strip_suffix("Size")
            .and_then(|base| self.texture(base))
            .map(UniformSemantic::TextureSize)
    }

    fn alias_index(&self, name: &str) -> Option<usize> {
        self.aliases
            .iter()
            .position(|a| a.as_deref() == Some(name))
    }
}

fn parse_index(name: &str, prefix: &str) -> Option<usize> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Check that `sem`, referenced by pass `pass`, can be satisfied by a chain of
/// `pass_count` passes with `lut_count` LUTs.
pub fn validate_reference(
    pass: usize,
    sem: TextureSemantic,
    pass_count: usize,
    lut_count: usize,
) -> Result<(), String> {
    match sem {
        TextureSemantic::OriginalHistory(n) if n > MAX_HISTORY_DEPTH => Err(format!(
            "pass {pass} reads OriginalHistory{n}, deeper than the {MAX_HISTORY_DEPTH}-frame limit"
        )),
        TextureSemantic::PassOutput(n) if n >= pass => Err(format!(
            "pass {pass} reads PassOutput{n}, which is not an earlier pass"
        )),
        TextureSemantic::PassFeedback(n) if n >= pass_count => Err(format!(
            "pass {pass} reads PassFeedback{n}, but the chain has {pass_count} passes"
        )),
        TextureSemantic::User(n) if n >= lut_count => Err(format!(
            "pass {pass} reads User{n}, but the preset declares {lut_count} textures"
        )),
        _ => Ok(()),
    }
}
