//! Shader compilation seam.
//!
//! The chain hands each pass's shader text to a [`ShaderCompiler`] and gets back a backend
//! program plus the resource names the shader declares. [`GlslCompiler`] handles combined
//! GLSL files split by `#pragma stage vertex` / `#pragma stage fragment`.

use scanline_core::{EngineError, ProgramHandle, ShaderSource, VideoBackend};
use scanline_preset::{parse_parameter_pragmas, ParameterDecl};

/// Names a compiled pass declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reflection {
    pub samplers: Vec<String>,
    pub uniforms: Vec<String>,
    pub parameters: Vec<ParameterDecl>,
}

#[derive(Debug, Clone)]
pub struct CompiledPass {
    pub program: ProgramHandle,
    pub reflection: Reflection,
}

pub trait ShaderCompiler {
    /// Compile the combined shader text of pass `pass`. Errors are reported as
    /// [`EngineError::ShaderCompile`].
    fn compile(
        &self,
        backend: &mut dyn VideoBackend,
        pass: usize,
        text: &str,
        origin: Option<&str>,
    ) -> Result<CompiledPass, EngineError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlslCompiler;

impl ShaderCompiler for GlslCompiler {
    fn compile(
        &self,
        backend: &mut dyn VideoBackend,
        pass: usize,
        text: &str,
        origin: Option<&str>,
    ) -> Result<CompiledPass, EngineError> {
        let (vert, frag) = split_stages(text);
        let reflection = Reflection {
            samplers: declared(&[&vert, &frag], true),
            uniforms: declared(&[&vert, &frag], false),
            parameters: parse_parameter_pragmas(text),
        };
        let source = ShaderSource {
            vert,
            frag,
            origin: origin.map(str::to_string),
        };
        let program = backend
            .compile_program(&source)
            .map_err(|e| EngineError::ShaderCompile {
                pass,
                msg: e.to_string(),
            })?;
        Ok(CompiledPass {
            program,
            reflection,
        })
    }
}

/// Split a combined file into (vertex, fragment). Lines before the first stage pragma are
/// shared by both stages. A file without stage pragmas is a fragment shader paired with
/// [`STOCK_VERT`].
pub fn split_stages(text: &str) -> (String, String) {
    #[derive(Clone, Copy, PartialEq)]
    enum Stage {
        Common,
        Vertex,
        Fragment,
    }

    let mut stage = Stage::Common;
    let mut common = String::new();
    let mut vert = String::new();
    let mut frag = String::new();
    let mut seen_stage = false;

    for line in text.lines() {
        match line.trim() {
            "#pragma stage vertex" => {
                stage = Stage::Vertex;
                seen_stage = true;
                continue;
            }
            "#pragma stage fragment" => {
                stage = Stage::Fragment;
                seen_stage = true;
                continue;
            }
            _ => {}
        }
        let dst = match stage {
            Stage::Common => &mut common,
            Stage::Vertex => &mut vert,
            Stage::Fragment => &mut frag,
        };
        dst.push_str(line);
        dst.push('\n');
    }

    if !seen_stage {
        return (STOCK_VERT.to_string(), common);
    }
    (format!("{common}{vert}"), format!("{common}{frag}"))
}

/// Collect `uniform` declarations; `samplers` selects sampler types or everything else.
fn declared(stages: &[&str], samplers: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for src in stages {
        for line in src.lines() {
            let Some((ty, name)) = uniform_decl(line) else {
                continue;
            };
            if ty.starts_with("sampler") == samplers && !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
    }
    out
}

fn uniform_decl(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let after_layout = match line.strip_prefix("layout") {
        Some(rest) => rest.split_once(')')?.1.trim_start(),
        None => line,
    };
    let rest = after_layout.strip_prefix("uniform")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut tokens = rest
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|t| !t.is_empty())
        .skip_while(|t| matches!(*t, "lowp" | "mediump" | "highp"));
    let ty = tokens.next()?;
    let name = tokens.next()?;
    let name = name.split('[').next().unwrap_or(name);
    Some((ty, name))
}

pub const STOCK_VERT: &str = r#"#version 330 core
layout (location = 0) in vec2 a_pos;
layout (location = 1) in vec2 a_uv;
uniform mat4 MVP;
out vec2 v_uv;
void main() {
    v_uv = a_uv;
    gl_Position = MVP * vec4(a_pos, 0.0, 1.0);
}
"#;

pub const STOCK_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 FragColor;
uniform sampler2D Source;
void main() {
    FragColor = texture(Source, v_uv);
}
"#;

/// Combined passthrough shader used by the stock chain and the final composite.
pub fn stock_shader() -> String {
    format!("#pragma stage vertex\n{STOCK_VERT}#pragma stage fragment\n{STOCK_FRAG}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanline_runtime_headless::HeadlessBackend;

    const COMBINED: &str = r#"#version 330 core
#pragma parameter strength "Strength" 0.5 0.0 1.0 0.1
uniform float strength;
#pragma stage vertex
layout (location = 0) in vec2 a_pos;
uniform mat4 MVP;
void main() { gl_Position = MVP * vec4(a_pos, 0.0, 1.0); }
#pragma stage fragment
uniform sampler2D Source;
uniform sampler2D PassFeedback0;
uniform highp vec4 SourceSize;
uniform float weights[4];
out vec4 o;
void main() { o = texture(Source, vec2(0.0)) * strength; }
"#;

    #[test]
    fn splits_stages_and_shares_prefix() {
        let (v, f) = split_stages(COMBINED);
        assert!(v.starts_with("#version 330 core"));
        assert!(f.starts_with("#version 330 core"));
        assert!(v.contains("gl_Position"));
        assert!(!v.contains("texture(Source"));
        assert!(f.contains("texture(Source"));
        assert!(!f.contains("#pragma stage"));
    }

    #[test]
    fn fragment_only_file_gets_stock_vertex() {
        let (v, f) = split_stages(STOCK_FRAG);
        assert_eq!(v, STOCK_VERT);
        assert!(f.contains("FragColor"));
    }

    #[test]
    fn reflection_collects_samplers_uniforms_and_parameters() {
        let mut gpu = HeadlessBackend::new();
        let compiled = GlslCompiler
            .compile(&mut gpu, 0, COMBINED, Some("test"))
            .expect("compile");
        let r = compiled.reflection;
        assert_eq!(r.samplers, vec!["Source", "PassFeedback0"]);
        assert_eq!(r.uniforms, vec!["strength", "MVP", "SourceSize", "weights"]);
        assert_eq!(r.parameters.len(), 1);
        assert_eq!(r.parameters[0].name, "strength");
    }

    #[test]
    fn backend_failure_becomes_pass_error() {
        let mut gpu = HeadlessBackend::new();
        let err = GlslCompiler
            .compile(&mut gpu, 3, "#error broken\n", None)
            .expect_err("must fail");
        match err {
            EngineError::ShaderCompile { pass, .. } => assert_eq!(pass, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stock_shader_reflects_source_and_mvp() {
        let mut gpu = HeadlessBackend::new();
        let compiled = GlslCompiler
            .compile(&mut gpu, 0, &stock_shader(), None)
            .expect("stock");
        assert_eq!(compiled.reflection.samplers, vec!["Source"]);
        assert_eq!(compiled.reflection.uniforms, vec!["MVP"]);
    }
}
