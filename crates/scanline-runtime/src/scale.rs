//! Output-size resolution for every pass of a chain.

use scanline_core::{Rotation, Size};
use scanline_preset::{AxisScale, ScaleRule};

/// How a last pass drawn straight to the backbuffer reports `OutputSize` under odd
/// rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationPolicy {
    /// Report the rotated (transposed) size.
    #[default]
    SwapOutputSize,
    /// Report the viewport size unchanged.
    KeepOutputSize,
}

/// Where a pass writes and what size it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassGeometry {
    /// Size of the pass's render target (or of the viewport for backbuffer passes).
    pub target: Size,
    pub to_backbuffer: bool,
    /// Value of the pass's `OutputSize` uniform.
    pub output_size: Size,
}

fn resolve_axis(axis: AxisScale, prev: u32, viewport: u32) -> u32 {
    let v = match axis {
        AxisScale::Input(s) => (prev as f32 * s) as u32,
        AxisScale::Viewport(s) => (viewport as f32 * s) as u32,
        AxisScale::Absolute(n) => n,
    };
    if v == 0 {
        viewport
    } else {
        v
    }
}

/// Resolve every pass's geometry for a `source`-sized input shown in `viewport`.
///
/// - a pass without a rule keeps its input size; the last such pass takes the viewport
/// - zero results fall back to the viewport on that axis
/// - the last pass draws directly to the backbuffer when its size equals the viewport
///   (compared unrotated)
pub fn resolve_chain(
    scales: &[Option<ScaleRule>],
    source: Size,
    viewport: Size,
    rotation: Rotation,
    policy: RotationPolicy,
) -> Vec<PassGeometry> {
    let mut out = Vec::with_capacity(scales.len());
    let mut prev = source;
    let last = scales.len().saturating_sub(1);

    for (i, rule) in scales.iter().enumerate() {
        let size = match rule {
            Some(rule) => Size::new(
                resolve_axis(rule.x, prev.width, viewport.width),
                resolve_axis(rule.y, prev.height, viewport.height),
            ),
            None if i == last => viewport,
            None => prev,
        };

        let to_backbuffer = i == last && size == viewport;
        let output_size = if to_backbuffer
            && rotation.is_transposing()
            && policy == RotationPolicy::SwapOutputSize
        {
            size.transposed()
        } else {
            size
        };

        out.push(PassGeometry {
            target: size,
            to_backbuffer,
            output_size,
        });
        prev = size;
    }
    out
}
