//! Geometry, pixel-format and sampling vocabulary shared by every scanline crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Swap width and height (odd quarter-turn rotations).
    pub fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    /// `(w, h, 1/w, 1/h)`, the layout of every `*Size` uniform.
    pub fn as_vec4(&self) -> [f32; 4] {
        let w = self.width.max(1) as f32;
        let h = self.height.max(1) as f32;
        [w, h, 1.0 / w, 1.0 / h]
    }
}

/// Destination rectangle inside the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    /// 16-bit packed frames produced by some cores.
    Rgb565,
    Rgba16Float,
    Rgb10A2Unorm,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgba16Float => 8,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    ClampToBorder,
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl WrapMode {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "clamp_to_border" => Some(WrapMode::ClampToBorder),
            "clamp_to_edge" => Some(WrapMode::ClampToEdge),
            "repeat" => Some(WrapMode::Repeat),
            "mirrored_repeat" => Some(WrapMode::MirroredRepeat),
            _ => None,
        }
    }
}

/// Display rotation applied to the final image, in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_quarter_turns(n: u32) -> Self {
        match n % 4 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    pub fn quarter_turns(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }

    /// Odd rotations swap the displayed width and height.
    pub fn is_transposing(self) -> bool {
        self.quarter_turns() % 2 == 1
    }
}

/// Column-major 4x4 matrix, uploaded as-is to `MVP`.
pub type Mat4 = [f32; 16];

pub const IDENTITY_MVP: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, //
];

/// Orthographic projection of the unit quad `[0,1]^2` onto clip space, rotated by `rotation`.
pub fn ortho_mvp(rotation: Rotation) -> Mat4 {
    // ortho(0, 1, 0, 1, -1, 1)
    let ortho: Mat4 = [
        2.0, 0.0, 0.0, 0.0, //
        0.0, 2.0, 0.0, 0.0, //
        0.0, 0.0, -1.0, 0.0, //
        -1.0, -1.0, 0.0, 1.0, //
    ];
    let (s, c) = match rotation {
        Rotation::Deg0 => (0.0, 1.0),
        Rotation::Deg90 => (1.0, 0.0),
        Rotation::Deg180 => (0.0, -1.0),
        Rotation::Deg270 => (-1.0, 0.0),
    };
    let rot: Mat4 = [
        c, s, 0.0, 0.0, //
        -s, c, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0, //
    ];
    mat4_mul(&rot, &ortho)
}

pub fn mat4_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut acc = 0.0;
            for k in 0..4 {
                acc += a[k * 4 + row] * b[col * 4 + k];
            }
            out[col * 4 + row] = acc;
        }
    }
    out
}

/// Borrowed CPU pixel data (core frames, LUT uploads).
#[derive(Debug, Clone, Copy)]
pub struct ImageData<'a> {
    pub size: Size,
    /// Bytes per row; may exceed `width * bpp` for padded core buffers.
    pub pitch: usize,
    pub format: PixelFormat,
    pub bytes: &'a [u8],
}

impl<'a> ImageData<'a> {
    pub fn tightly_packed(size: Size, format: PixelFormat, bytes: &'a [u8]) -> Self {
        Self {
            size,
            pitch: size.width as usize * format.bytes_per_pixel(),
            format,
            bytes,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.size.width as usize * self.format.bytes_per_pixel()
    }

    /// `true` when `bytes` covers `height` rows of `pitch` bytes (last row may be unpadded).
    pub fn is_consistent(&self) -> bool {
        if self.size.is_empty() {
            return false;
        }
        if self.pitch < self.row_bytes() {
            return false;
        }
        let needed = self.pitch * (self.size.height as usize - 1) + self.row_bytes();
        self.bytes.len() >= needed
    }
}

/// Owned decoded image returned by the LUT image-loader collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub size: Size,
    /// RGBA8, tightly packed.
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    pub fn as_image_data(&self) -> ImageData<'_> {
        ImageData::tightly_packed(self.size, PixelFormat::Rgba8Unorm, &self.rgba)
    }
}
