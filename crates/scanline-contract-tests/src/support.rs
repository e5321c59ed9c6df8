//! Fixtures and log capture shared by the contract tests.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use scanline_core::{ImageData, PixelFormat, Size, VideoSettings};
use scanline_runtime::{Collaborators, Pipeline};
use scanline_runtime_headless::HeadlessBackend;

// ---- Golden fixtures ----
pub const TWO_PASS_SLANGP: &str = include_str!("../fixtures/two_pass.slangp");
pub const PASSTHROUGH_GLSL: &str = include_str!("../fixtures/passthrough.glsl");
pub const SETTINGS_PARTIAL_JSON: &str = include_str!("../fixtures/settings_partial.json");
pub const SETTINGS_BAD_HARD_SYNC_JSON: &str =
    include_str!("../fixtures/settings_bad_hard_sync.json");
pub const SETTINGS_MALFORMED_JSON: &str = include_str!("../fixtures/settings_malformed.json");
pub const PRESET_FEEDBACK_JSON: &str = include_str!("../fixtures/preset_feedback.json");
pub const PRESET_HISTORY_JSON: &str = include_str!("../fixtures/preset_history.json");
pub const PRESET_UNKNOWN_SAMPLER_JSON: &str =
    include_str!("../fixtures/preset_unknown_sampler.json");

pub fn temp_dir(tag: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("scanline_contract_tests_{tag}_{}_{ts}", std::process::id()));
    fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn write_temp_fixture(tag: &str, file_name: &str, contents: &str) -> PathBuf {
    let path = temp_dir(tag).join(file_name);
    fs::write(&path, contents).expect("write fixture");
    path
}

/// Lay out the two-pass preset next to its shaders; returns the preset path.
pub fn write_two_pass_preset(tag: &str) -> PathBuf {
    let dir = temp_dir(tag);
    fs::write(dir.join("blur.glsl"), PASSTHROUGH_GLSL).expect("write blur.glsl");
    fs::write(dir.join("output.glsl"), PASSTHROUGH_GLSL).expect("write output.glsl");
    let preset = dir.join("two_pass.slangp");
    fs::write(&preset, TWO_PASS_SLANGP).expect("write preset");
    preset
}

pub fn headless_pipeline(settings: VideoSettings, surface: Size) -> Pipeline<HeadlessBackend> {
    Pipeline::new(
        HeadlessBackend::new(),
        settings,
        surface,
        Collaborators::default(),
    )
    .expect("headless pipeline")
}

/// Tightly packed RGBA8 pixels of one repeated byte.
pub fn solid_pixels(size: Size, fill: u8) -> Vec<u8> {
    vec![fill; size.width as usize * size.height as usize * 4]
}

pub fn rgba(size: Size, bytes: &[u8]) -> ImageData<'_> {
    ImageData::tightly_packed(size, PixelFormat::Rgba8Unorm, bytes)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a WARN-level subscriber scoped to this thread; returns its result and the
/// formatted log output.
pub fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, String) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    let bytes = capture.0.lock().expect("log buffer").clone();
    (out, String::from_utf8_lossy(&bytes).into_owned())
}
