use std::fs;
use std::path::{Path, PathBuf};

use scanline_core::EngineError;

use crate::{slangp, Preset};

/// Source of presets and shader text. The chain only sees this seam, so hosts can serve
/// presets from archives or memory.
pub trait PresetLoader {
    fn load_preset(&self, path: &Path) -> Result<Preset, EngineError>;
    fn read_shader(&self, path: &Path) -> Result<String, EngineError>;
}

/// Filesystem loader. Dispatches on extension: `.json` is parsed as JSON, anything else as
/// key/value preset text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPresetLoader;

impl PresetLoader for FsPresetLoader {
    fn load_preset(&self, path: &Path) -> Result<Preset, EngineError> {
        let text = read(path)?;
        let mut preset = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Preset::from_json_str(&text)?,
            _ => slangp::parse(&text)?,
        };
        preset.base_dir = path.parent().map(Path::to_path_buf);
        tracing::debug!(
            path = %path.display(),
            passes = preset.passes.len(),
            luts = preset.luts.len(),
            "loaded shader preset"
        );
        Ok(preset)
    }

    fn read_shader(&self, path: &Path) -> Result<String, EngineError> {
        read(path)
    }
}

fn read(path: &Path) -> Result<String, EngineError> {
    fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: PathBuf::from(path),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShaderRef;

    fn temp_dir(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("scanline_preset_{tag}_{}", std::process::id()));
        fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn relative_paths_resolve_against_preset_dir() {
        let dir = temp_dir("relative");
        let preset_path = dir.join("crt.slangp");
        fs::write(&preset_path, "shaders = 1\nshader0 = shaders/crt.slang\n").expect("write");

        let preset = FsPresetLoader.load_preset(&preset_path).expect("load");
        let ShaderRef::Path(rel) = &preset.passes[0].shader else {
            panic!("expected path shader");
        };
        assert_eq!(preset.resolve_path(rel), dir.join("shaders/crt.slang"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn json_extension_uses_json_parser() {
        let dir = temp_dir("json");
        let preset_path = dir.join("p.json");
        fs::write(&preset_path, r#"{ "passes": [ { "shader": "stock" } ] }"#).expect("write");

        let preset = FsPresetLoader.load_preset(&preset_path).expect("load");
        assert!(preset.is_stock());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = FsPresetLoader
            .load_preset(Path::new("/nonexistent/scanline/preset.slangp"))
            .expect_err("missing file");
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
