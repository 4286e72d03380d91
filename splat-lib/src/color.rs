//! Color encoding: linear RGB to sRGB, and sRGB to the zeroth-order
//! spherical harmonics coefficient stored in `f_dc_*`.

use crate::backend::ExecutionBackend;
use crate::common::SH_C0;
use crate::structures::{ColorSpace, Gaussian3D, GaussianSet};
use nalgebra::Vector3;

const SRGB_LINEAR_THRESHOLD: f32 = 0.003_130_8;
const SRGB_ENCODED_THRESHOLD: f32 = 0.040_45;

/// sRGB gamma encoding, clamped to `[0, 1]`. NaN passes through.
#[inline]
pub fn linear_to_srgb(c: f32) -> f32 {
    let encoded = if c <= SRGB_LINEAR_THRESHOLD {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    encoded.clamp(0.0, 1.0)
}

#[inline]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= SRGB_ENCODED_THRESHOLD {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
pub fn rgb_to_sh_dc(c: f32) -> f32 {
    (c - 0.5) / SH_C0
}

#[inline]
pub fn sh_dc_to_rgb(c: f32) -> f32 {
    c * SH_C0 + 0.5
}

/// Linear RGB triple to stored SH DC coefficients in the target space.
#[inline]
pub fn encode_color(linear: &Vector3<f32>, color_space: ColorSpace) -> Vector3<f32> {
    match color_space {
        ColorSpace::Srgb => linear.map(|c| rgb_to_sh_dc(linear_to_srgb(c))),
        ColorSpace::LinearRgb => linear.map(rgb_to_sh_dc),
    }
}

/// Stored SH DC coefficients back to an sRGB triple.
#[inline]
pub fn decode_color(sh_dc: &Vector3<f32>) -> Vector3<f32> {
    sh_dc.map(sh_dc_to_rgb)
}

/// Replaces every linear color with its SH DC encoding. Geometry and opacity
/// are carried over.
pub fn encode_colors(
    gaussians: GaussianSet,
    color_space: ColorSpace,
    backend: ExecutionBackend,
) -> GaussianSet {
    let encoded = backend.map(gaussians.as_slice(), |g| Gaussian3D {
        color: encode_color(&g.color, color_space),
        ..*g
    });

    log::debug!(
        target: "splat::color",
        "encode_colors > {} gaussians as {:?}",
        encoded.len(),
        color_space,
    );

    GaussianSet::new(encoded)
}
