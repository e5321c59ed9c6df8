//! LUT image decoding collaborator.

use std::path::Path;

use scanline_core::{DecodedImage, EngineError, Size};

pub trait ImageLoader {
    /// Decode `path` into tightly packed RGBA8.
    fn load(&self, path: &Path) -> Result<DecodedImage, EngineError>;
}

/// Decodes PNG/JPEG through the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateLoader;

impl ImageLoader for ImageCrateLoader {
    fn load(&self, path: &Path) -> Result<DecodedImage, EngineError> {
        let img = image::open(path)
            .map_err(|e| EngineError::ImageDecode {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })?
            .to_rgba8();
        let size = Size::new(img.width(), img.height());
        Ok(DecodedImage {
            size,
            rgba: img.into_raw(),
        })
    }
}
