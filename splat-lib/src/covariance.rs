//! Covariance composition and decomposition.
//!
//! `C = R · diag(s²) · Rᵗ` where `R` is the rotation of the quaternion and
//! `s` the principal axis lengths. Decomposition goes through an SVD, which
//! coincides with the eigendecomposition for symmetric PSD input.

use crate::backend::ExecutionBackend;
use crate::common::try_normalize_quat;
use crate::error::SplatError;
use crate::rotation::{quaternion_to_matrix, to_quaternion};
use nalgebra::{Matrix3, Quaternion, Vector3};

pub fn compose(q: &Quaternion<f32>, scale: &Vector3<f32>) -> Option<Matrix3<f32>> {
    let r = quaternion_to_matrix(&try_normalize_quat(q)?);
    let variances = Matrix3::from_diagonal(&scale.component_mul(scale));
    let c = r * variances * r.transpose();
    // Round-off can leave the two halves apart by an ulp.
    Some((c + c.transpose()) * 0.5)
}

/// Turns an improper orthogonal matrix into a rotation by negating its last
/// column. Proper matrices pass through.
#[inline]
pub fn fix_reflection(mut u: Matrix3<f32>) -> Matrix3<f32> {
    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    u
}

/// Recovers `(q, s)` from a symmetric PSD covariance. Singular values come
/// out in descending order; zero axes are valid and give a zero scale.
pub fn decompose(c: &Matrix3<f32>) -> Result<(Quaternion<f32>, Vector3<f32>), String> {
    if c.iter().any(|v| !v.is_finite()) {
        return Err("covariance has non-finite entries".to_string());
    }
    let svd = c.svd(true, false);
    let u = svd.u.ok_or_else(|| "SVD did not produce U".to_string())?;
    let rotation = fix_reflection(u);
    let scale = svd.singular_values.map(|sigma| sigma.max(0.0).sqrt());
    Ok((to_quaternion(&rotation), scale))
}

pub fn compose_batch(
    quaternions: &[Quaternion<f32>],
    scales: &[Vector3<f32>],
    backend: ExecutionBackend,
) -> Result<Vec<Matrix3<f32>>, SplatError> {
    if quaternions.len() != scales.len() {
        return Err(SplatError::DegenerateInput {
            index: quaternions.len().min(scales.len()),
            reason: format!(
                "{} quaternions but {} scales",
                quaternions.len(),
                scales.len()
            ),
        });
    }
    let pairs: Vec<_> = quaternions.iter().zip(scales).collect();
    backend.try_map(&pairs, |index, (q, s)| {
        compose(q, s).ok_or_else(|| SplatError::DegenerateInput {
            index,
            reason: "quaternion has zero or non-finite norm".to_string(),
        })
    })
}

/// Decomposes a whole batch. The batch is rejected at the first element that
/// cannot be decomposed.
pub fn decompose_batch(
    covariances: &[Matrix3<f32>],
    backend: ExecutionBackend,
) -> Result<Vec<(Quaternion<f32>, Vector3<f32>)>, SplatError> {
    backend.try_map(covariances, |index, c| {
        decompose(c).map_err(|reason| SplatError::DegenerateInput { index, reason })
    })
}
