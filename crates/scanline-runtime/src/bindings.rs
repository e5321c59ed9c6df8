//! Per-frame semantic → resource mapping.
//!
//! The table is rebuilt every frame from the chain's current history, feedback, LUT and
//! pass-output state and is never carried across frames.

use std::collections::{BTreeMap, HashMap};

use scanline_core::{
    BoundTexture, BoundUniform, FilterMode, Mat4, Size, TextureHandle, UniformValue, WrapMode,
};
use scanline_preset::{TextureSemantic, UniformSemantic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sampling {
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mipmap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: TextureHandle,
    pub size: Size,
    pub sampling: Sampling,
}

/// Scalar inputs for one pass draw.
#[derive(Debug, Clone, Copy)]
pub struct PassInputs<'a> {
    pub mvp: Mat4,
    pub output_size: Size,
    pub final_viewport: Size,
    pub frame_count: u32,
    pub frame_direction: i32,
    pub parameters: &'a HashMap<String, f32>,
    /// Sampling of the reading pass; applies to `Source`, `Original` and history.
    pub sampling: Sampling,
}

#[derive(Debug, Default)]
pub struct SemanticBindingTable {
    textures: BTreeMap<TextureSemantic, TextureBinding>,
}

impl SemanticBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.textures.clear();
    }

    pub fn bind(&mut self, semantic: TextureSemantic, binding: TextureBinding) {
        self.textures.insert(semantic, binding);
    }

    pub fn get(&self, semantic: TextureSemantic) -> Option<&TextureBinding> {
        self.textures.get(&semantic)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Turn a pass's declared names into concrete draw bindings. Names whose semantic has
    /// no resource this frame are skipped.
    pub fn resolve(
        &self,
        samplers: &[(String, TextureSemantic)],
        uniforms: &[(String, UniformSemantic)],
        inputs: &PassInputs<'_>,
    ) -> (Vec<BoundTexture>, Vec<BoundUniform>) {
        let mut textures = Vec::with_capacity(samplers.len());
        for (binding, (name, sem)) in samplers.iter().enumerate() {
            let Some(b) = self.get(*sem) else {
                tracing::debug!(name = name.as_str(), ?sem, "sampler has no resource this frame");
                continue;
            };
            let sampling = match sem {
                TextureSemantic::Source
                | TextureSemantic::Original
                | TextureSemantic::OriginalHistory(_) => inputs.sampling,
                _ => b.sampling,
            };
            textures.push(BoundTexture {
                binding: binding as u32,
                name: name.clone(),
                texture: b.texture,
                filter: sampling.filter,
                wrap: sampling.wrap,
                mipmap: sampling.mipmap,
            });
        }

        let mut values = Vec::with_capacity(uniforms.len());
        for (name, sem) in uniforms {
            let value = match sem {
                UniformSemantic::Mvp => UniformValue::Mat4(inputs.mvp),
                UniformSemantic::OutputSize => UniformValue::Vec4(inputs.output_size.as_vec4()),
                UniformSemantic::FinalViewportSize => {
                    UniformValue::Vec4(inputs.final_viewport.as_vec4())
                }
                UniformSemantic::FrameCount => UniformValue::U32(inputs.frame_count),
                UniformSemantic::FrameDirection => UniformValue::I32(inputs.frame_direction),
                UniformSemantic::TextureSize(t) => match self.get(*t) {
                    Some(b) => UniformValue::Vec4(b.size.as_vec4()),
                    None => continue,
                },
                UniformSemantic::Parameter(p) => match inputs.parameters.get(p) {
                    Some(v) => UniformValue::F32(*v),
                    None => continue,
                },
            };
            values.push(BoundUniform {
                name: name.clone(),
                value,
            });
        }
        (textures, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanline_core::IDENTITY_MVP;

    fn binding(id: u64, w: u32, h: u32) -> TextureBinding {
        TextureBinding {
            texture: TextureHandle(id),
            size: Size::new(w, h),
            sampling: Sampling {
                filter: FilterMode::Nearest,
                wrap: WrapMode::Repeat,
                mipmap: false,
            },
        }
    }

    #[test]
    fn resolves_textures_sizes_and_scalars() {
        let mut table = SemanticBindingTable::new();
        table.bind(TextureSemantic::Source, binding(1, 320, 240));
        table.bind(TextureSemantic::PassFeedback(0), binding(2, 640, 480));

        let params = HashMap::from([("gamma".to_string(), 2.2f32)]);
        let inputs = PassInputs {
            mvp: IDENTITY_MVP,
            output_size: Size::new(640, 480),
            final_viewport: Size::new(1920, 1080),
            frame_count: 7,
            frame_direction: -1,
            parameters: &params,
            sampling: Sampling::default(),
        };
        let samplers = vec![
            ("Source".to_string(), TextureSemantic::Source),
            ("PassFeedback0".to_string(), TextureSemantic::PassFeedback(0)),
            ("OriginalHistory2".to_string(), TextureSemantic::OriginalHistory(2)),
        ];
        let uniforms = vec![
            ("SourceSize".to_string(), UniformSemantic::TextureSize(TextureSemantic::Source)),
            ("FrameCount".to_string(), UniformSemantic::FrameCount),
            ("FrameDirection".to_string(), UniformSemantic::FrameDirection),
            ("gamma".to_string(), UniformSemantic::Parameter("gamma".into())),
        ];

        let (tex, uni) = table.resolve(&samplers, &uniforms, &inputs);
        assert_eq!(tex.len(), 2, "unbound history must be skipped");
        assert_eq!(tex[0].filter, FilterMode::Linear, "Source uses the reader's sampling");
        assert_eq!(tex[1].filter, FilterMode::Nearest);
        assert_eq!(tex[1].binding, 1);

        assert_eq!(uni[0].value, UniformValue::Vec4([320.0, 240.0, 1.0 / 320.0, 1.0 / 240.0]));
        assert_eq!(uni[1].value, UniformValue::U32(7));
        assert_eq!(uni[2].value, UniformValue::I32(-1));
        assert_eq!(uni[3].value, UniformValue::F32(2.2));
    }
}
