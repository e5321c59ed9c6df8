//! Shader-declared user parameters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub description: String,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl ParameterDecl {
    pub fn clamp(&self, v: f32) -> f32 {
        if self.min <= self.max {
            v.clamp(self.min, self.max)
        } else {
            v
        }
    }
}

/// Collect `#pragma parameter NAME "description" default min max [step]` lines.
///
/// Malformed lines are skipped; the first declaration of a name wins.
pub fn parse_parameter_pragmas(source: &str) -> Vec<ParameterDecl> {
    let mut out: Vec<ParameterDecl> = Vec::new();
    for line in source.lines() {
        let Some(rest) = line.trim().strip_prefix("#pragma parameter") else {
            continue;
        };
        let Some(decl) = parse_one(rest.trim()) else {
            tracing::debug!(line, "skipping malformed parameter pragma");
            continue;
        };
        if !out.iter().any(|d| d.name == decl.name) {
            out.push(decl);
        }
    }
    out
}

fn parse_one(rest: &str) -> Option<ParameterDecl> {
    let (name, rest) = rest.split_once(char::is_whitespace)?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let (description, rest) = rest.split_once('"')?;
    let nums: Vec<f32> = rest
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if nums.len() < 3 {
        return None;
    }
    Some(ParameterDecl {
        name: name.to_string(),
        description: description.to_string(),
        default: nums[0],
        min: nums[1],
        max: nums[2],
        step: nums.get(3).copied().unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parameter_pragmas() {
        let src = r#"
#version 330
#pragma parameter gamma "Display Gamma" 2.2 1.0 3.0 0.05
#pragma parameter scan "Scanline Strength" 0.5 0.0 1.0
#pragma parameter broken "Missing numbers"
void main() {}
"#;
        let decls = parse_parameter_pragmas(src);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "gamma");
        assert_eq!(decls[0].description, "Display Gamma");
        assert_eq!(decls[0].default, 2.2);
        assert_eq!(decls[0].step, 0.05);
        assert_eq!(decls[1].step, 0.0);
        assert_eq!(decls[1].clamp(4.0), 1.0);
    }
}
