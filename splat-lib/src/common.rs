use nalgebra::Quaternion;

pub const ZSTD_MAX_COMPRESSION_LVL: u32 = 22;

/// Zeroth-order real spherical harmonics basis constant, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f32 = 0.282_094_8;

/// Tolerance within which a quaternion counts as unit length.
pub const UNIT_QUAT_TOLERANCE: f32 = 1e-4;

/// Smallest and largest opacities [`sigmoid`] returns.
pub const MIN_OPACITY: f32 = f32::MIN_POSITIVE;
pub const MAX_OPACITY: f32 = 1.0 - f32::EPSILON / 2.0;

/// Logistic function, evaluated in f64 and clamped into `(0, 1)` so that
/// large stored logits still decode to valid opacities. NaN passes through.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    let p = 1.0 / (1.0 + (-f64::from(x)).exp());
    (p as f32).clamp(MIN_OPACITY, MAX_OPACITY)
}

/// Inverse of [`sigmoid`], `ln(p / (1 - p))`.
#[inline]
pub fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

/// Normalizes `q`, returning `None` when its norm is zero or not finite.
#[inline]
pub(crate) fn try_normalize_quat(q: &Quaternion<f32>) -> Option<Quaternion<f32>> {
    let norm = q.norm();
    if norm.is_finite() && norm > 0.0 {
        Some(Quaternion::from(q.coords / norm))
    } else {
        None
    }
}

#[inline]
pub fn is_unit_quat(q: &Quaternion<f32>) -> bool {
    (q.norm() - 1.0).abs() <= UNIT_QUAT_TOLERANCE
}
