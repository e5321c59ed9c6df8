//! `.slangp`/`.glslp`-style key/value preset files.
//!
//! ```text
//! shaders = 2
//! shader0 = shaders/blur.slang
//! scale_type0 = viewport
//! scale0 = 0.5
//! filter_linear0 = true
//! shader1 = shaders/crt.slang
//! textures = "Mask"
//! Mask = mask.png
//! parameters = "gamma"
//! gamma = 2.4
//! ```

use std::collections::HashMap;

use scanline_core::{EngineError, FilterMode, WrapMode};

use crate::{AxisScale, LutDesc, ParameterOverride, PassDesc, Preset, ScaleRule, ShaderRef};

#[derive(Debug)]
struct Entry {
    value: String,
    line: usize,
}

/// Parse preset text. Relative paths are kept as written; the loader sets `base_dir`.
pub fn parse(text: &str) -> Result<Preset, EngineError> {
    let map = parse_entries(text)?;
    let kv = Keys { map: &map };

    let count: usize = kv.require_parsed("shaders")?;
    if count == 0 {
        return Err(EngineError::InvalidPreset("shaders = 0".into()));
    }
    if count > crate::MAX_PASSES {
        return Err(EngineError::InvalidPreset(format!(
            "unsupported pass count {count}"
        )));
    }

    let mut passes = Vec::with_capacity(count);
    for i in 0..count {
        passes.push(parse_pass(&kv, i)?);
    }

    let mut luts = Vec::new();
    for name in kv.list("textures") {
        let path = kv.require(&name)?;
        luts.push(LutDesc {
            filter: match kv.parsed_bool(&format!("{name}_linear"))? {
                Some(false) => FilterMode::Nearest,
                _ => FilterMode::Linear,
            },
            wrap: kv.wrap(&format!("{name}_wrap_mode"))?.unwrap_or_default(),
            mipmap: kv.parsed_bool(&format!("{name}_mipmap"))?.unwrap_or(false),
            path: path.into(),
            name,
        });
    }

    let mut parameters = Vec::new();
    for name in kv.list("parameters") {
        if let Some(value) = kv.parsed::<f32>(&name)? {
            parameters.push(ParameterOverride { name, value });
        }
    }

    let preset = Preset {
        passes,
        luts,
        parameters,
        base_dir: None,
    };
    preset.validate()?;
    Ok(preset)
}

fn parse_pass(kv: &Keys<'_>, i: usize) -> Result<PassDesc, EngineError> {
    let shader = kv.require(&format!("shader{i}"))?;
    let mut pass = PassDesc::new(ShaderRef::Path(shader.into()));

    pass.scale = parse_scale(kv, i)?;
    pass.filter = kv
        .parsed_bool(&format!("filter_linear{i}"))?
        .map(|linear| if linear { FilterMode::Linear } else { FilterMode::Nearest });
    pass.wrap = kv.wrap(&format!("wrap_mode{i}"))?.unwrap_or_default();
    pass.mipmap_input = kv.parsed_bool(&format!("mipmap_input{i}"))?.unwrap_or(false);
    pass.float_framebuffer = kv
        .parsed_bool(&format!("float_framebuffer{i}"))?
        .unwrap_or(false);
    pass.srgb_framebuffer = kv
        .parsed_bool(&format!("srgb_framebuffer{i}"))?
        .unwrap_or(false);
    pass.frame_count_mod = kv.parsed(&format!("frame_count_mod{i}"))?.unwrap_or(0);
    pass.alias = kv.get(&format!("alias{i}")).map(str::to_string);
    pass.feedback = kv.parsed_bool(&format!("feedback{i}"))?.unwrap_or(false);
    pass.history_depth = kv.parsed(&format!("history_depth{i}"))?.unwrap_or(0);
    Ok(pass)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleKind {
    Source,
    Viewport,
    Absolute,
}

/// No `scale_type*` key means the pass has no explicit rule, even if `scale*` is present.
fn parse_scale(kv: &Keys<'_>, i: usize) -> Result<Option<ScaleRule>, EngineError> {
    let both = kv.scale_kind(&format!("scale_type{i}"))?;
    let kx = kv.scale_kind(&format!("scale_type_x{i}"))?.or(both);
    let ky = kv.scale_kind(&format!("scale_type_y{i}"))?.or(both);
    if kx.is_none() && ky.is_none() {
        return Ok(None);
    }

    let scale = kv.get(&format!("scale{i}"));
    let axis = |kind: Option<ScaleKind>, key: String| -> Result<AxisScale, EngineError> {
        let raw = kv.get(&key).or(scale);
        let kind = kind.unwrap_or(ScaleKind::Source);
        Ok(match kind {
            ScaleKind::Source => AxisScale::Input(parse_f32(kv, &key, raw, 1.0)?),
            ScaleKind::Viewport => AxisScale::Viewport(parse_f32(kv, &key, raw, 1.0)?),
            ScaleKind::Absolute => {
                let v = match raw {
                    Some(s) => s.parse::<u32>().map_err(|_| kv.err(&key, "expected integer"))?,
                    None => 0,
                };
                AxisScale::Absolute(v)
            }
        })
    };

    Ok(Some(ScaleRule {
        x: axis(kx, format!("scale_x{i}"))?,
        y: axis(ky, format!("scale_y{i}"))?,
    }))
}

fn parse_f32(kv: &Keys<'_>, key: &str, raw: Option<&str>, default: f32) -> Result<f32, EngineError> {
    match raw {
        Some(s) => s.parse().map_err(|_| kv.err(key, "expected number")),
        None => Ok(default),
    }
}

fn parse_entries(text: &str) -> Result<HashMap<String, Entry>, EngineError> {
    let mut map = HashMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = strip_comment(raw).trim();
        if content.is_empty() {
            continue;
        }
        let Some((key, value)) = content.split_once('=') else {
            return Err(EngineError::PresetParse {
                line,
                msg: format!("expected 'key = value', got '{content}'"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(EngineError::PresetParse {
                line,
                msg: "empty key".into(),
            });
        }
        let value = unquote(value.trim()).to_string();
        map.insert(key.to_string(), Entry { value, line });
    }
    Ok(map)
}

/// `#` starts a comment unless it is inside double quotes.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

fn unquote(v: &str) -> &str {
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(v)
}

struct Keys<'a> {
    map: &'a HashMap<String, Entry>,
}

impl Keys<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|e| e.value.as_str())
    }

    fn err(&self, key: &str, msg: &str) -> EngineError {
        EngineError::PresetParse {
            line: self.map.get(key).map(|e| e.line).unwrap_or(0),
            msg: format!("{key}: {msg}"),
        }
    }

    fn require(&self, key: &str) -> Result<String, EngineError> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| EngineError::InvalidPreset(format!("missing key '{key}'")))
    }

    fn require_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<T, EngineError> {
        self.parsed(key)?
            .ok_or_else(|| EngineError::InvalidPreset(format!("missing key '{key}'")))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, EngineError> {
        self.get(key)
            .map(|v| v.parse::<T>().map_err(|_| self.err(key, "invalid value")))
            .transpose()
    }

    fn parsed_bool(&self, key: &str) -> Result<Option<bool>, EngineError> {
        self.get(key)
            .map(|v| match v {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(self.err(key, "expected true/false")),
            })
            .transpose()
    }

    fn wrap(&self, key: &str) -> Result<Option<WrapMode>, EngineError> {
        self.get(key)
            .map(|v| WrapMode::from_name(v).ok_or_else(|| self.err(key, "unknown wrap mode")))
            .transpose()
    }

    fn scale_kind(&self, key: &str) -> Result<Option<ScaleKind>, EngineError> {
        self.get(key)
            .map(|v| match v {
                "source" => Ok(ScaleKind::Source),
                "viewport" => Ok(ScaleKind::Viewport),
                "absolute" => Ok(ScaleKind::Absolute),
                _ => Err(self.err(key, "expected source/viewport/absolute")),
            })
            .transpose()
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PASS: &str = r#"
# two-pass blur + crt
shaders = 2
shader0 = "shaders/blur.slang"
scale_type0 = viewport
scale0 = 0.5
filter_linear0 = false
alias0 = Blur
feedback0 = true

shader1 = shaders/crt.slang
scale_type_x1 = absolute
scale_x1 = 640
scale_type_y1 = source
scale_y1 = 2.0
frame_count_mod1 = 60
history_depth1 = 2

textures = "Mask;Grade"
Mask = mask.png
Mask_linear = false
Mask_wrap_mode = repeat
Grade = grade.png # trailing comment
parameters = "gamma"
gamma = 2.4
"#;

    #[test]
    fn parses_two_pass_preset() {
        let p = parse(TWO_PASS).expect("parse");
        assert_eq!(p.passes.len(), 2);

        let p0 = &p.passes[0];
        assert_eq!(p0.shader, ShaderRef::Path("shaders/blur.slang".into()));
        assert_eq!(p0.scale, Some(ScaleRule::viewport(0.5, 0.5)));
        assert_eq!(p0.filter, Some(FilterMode::Nearest));
        assert_eq!(p0.alias.as_deref(), Some("Blur"));
        assert!(p0.feedback);

        let p1 = &p.passes[1];
        assert_eq!(
            p1.scale,
            Some(ScaleRule {
                x: AxisScale::Absolute(640),
                y: AxisScale::Input(2.0),
            })
        );
        assert_eq!(p1.filter, None);
        assert_eq!(p1.frame_count_mod, 60);
        assert_eq!(p1.history_depth, 2);

        assert_eq!(p.luts.len(), 2);
        assert_eq!(p.luts[0].filter, FilterMode::Nearest);
        assert_eq!(p.luts[0].wrap, WrapMode::Repeat);
        assert_eq!(p.luts[1].path, std::path::PathBuf::from("grade.png"));
        assert_eq!(
            p.parameters,
            vec![ParameterOverride {
                name: "gamma".into(),
                value: 2.4
            }]
        );
    }

    #[test]
    fn scale_without_type_is_not_a_rule() {
        let p = parse("shaders = 1\nshader0 = a.slang\nscale0 = 2.0\n").expect("parse");
        assert_eq!(p.passes[0].scale, None);
    }

    #[test]
    fn absolute_without_scale_is_zero() {
        let p = parse("shaders = 1\nshader0 = a.slang\nscale_type0 = absolute\n").expect("parse");
        assert_eq!(p.passes[0].scale, Some(ScaleRule::absolute(0, 0)));
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = parse("shaders = 1\nthis is not a pair\n").expect_err("must fail");
        match err {
            EngineError::PresetParse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_shader_key_is_invalid() {
        let err = parse("shaders = 2\nshader0 = a.slang\n").expect_err("must fail");
        assert!(err.to_string().contains("shader1"), "got: {err}");
    }

    #[test]
    fn bad_scale_type_is_rejected() {
        let err = parse("shaders = 1\nshader0 = a\nscale_type0 = huge\n").expect_err("must fail");
        assert!(matches!(err, EngineError::PresetParse { line: 3, .. }), "got: {err}");
    }
}
