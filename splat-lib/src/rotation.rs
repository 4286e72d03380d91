//! Rotation matrix and quaternion conversion.
//!
//! Quaternions are Hamilton quaternions with `w` as the real part. The
//! matrix to quaternion direction uses Shepperd's method: each element picks
//! the largest of `w, x, y, z` as the pivot so the divisor stays away from
//! zero at every rotation angle.

use crate::backend::ExecutionBackend;
use crate::common::try_normalize_quat;
use nalgebra::{Matrix3, Quaternion};

/// Which quaternion component serves as the pivot for one matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShepperdCase {
    /// Positive trace, pivot on `w`.
    Trace,
    /// `R00` dominates, pivot on `x`.
    X,
    /// `R11` dominates, pivot on `y`.
    Y,
    /// `R22` dominates, pivot on `z`.
    Z,
}

impl ShepperdCase {
    #[inline]
    pub fn select(m: &Matrix3<f32>) -> Self {
        let (m00, m11, m22) = (m[(0, 0)], m[(1, 1)], m[(2, 2)]);
        if m00 + m11 + m22 > 0.0 {
            Self::Trace
        } else if m00 > m11 && m00 > m22 {
            Self::X
        } else if m11 > m22 {
            Self::Y
        } else {
            Self::Z
        }
    }
}

/// Converts one rotation matrix. Non-orthonormal input still yields a
/// quaternion, but it carries no meaning.
pub fn to_quaternion(m: &Matrix3<f32>) -> Quaternion<f32> {
    let (m00, m01, m02) = (m[(0, 0)], m[(0, 1)], m[(0, 2)]);
    let (m10, m11, m12) = (m[(1, 0)], m[(1, 1)], m[(1, 2)]);
    let (m20, m21, m22) = (m[(2, 0)], m[(2, 1)], m[(2, 2)]);

    // [w, x, y, z]
    let wxyz = match ShepperdCase::select(m) {
        ShepperdCase::Trace => {
            let s = (m00 + m11 + m22 + 1.0).sqrt() * 2.0;
            [0.25 * s, (m21 - m12) / s, (m02 - m20) / s, (m10 - m01) / s]
        }
        ShepperdCase::X => {
            let s = (1.0 + m00 - m11 - m22).sqrt() * 2.0;
            [(m21 - m12) / s, 0.25 * s, (m01 + m10) / s, (m02 + m20) / s]
        }
        ShepperdCase::Y => {
            let s = (1.0 + m11 - m00 - m22).sqrt() * 2.0;
            [(m02 - m20) / s, (m01 + m10) / s, 0.25 * s, (m12 + m21) / s]
        }
        ShepperdCase::Z => {
            let s = (1.0 + m22 - m00 - m11).sqrt() * 2.0;
            [(m10 - m01) / s, (m02 + m20) / s, (m12 + m21) / s, 0.25 * s]
        }
    };

    let q = Quaternion::new(wxyz[0], wxyz[1], wxyz[2], wxyz[3]);
    // Residual error from the divisions is removed here.
    try_normalize_quat(&q).unwrap_or(q)
}

/// Standard unit quaternion to rotation matrix formula. The quaternion is
/// used as given, callers normalize first.
pub fn quaternion_to_matrix(q: &Quaternion<f32>) -> Matrix3<f32> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    #[rustfmt::skip]
    let m = Matrix3::new(
        1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z),       2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),       1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),       2.0 * (y * z + w * x),       1.0 - 2.0 * (x * x + y * y),
    );
    m
}

pub fn to_quaternions(
    matrices: &[Matrix3<f32>],
    backend: ExecutionBackend,
) -> Vec<Quaternion<f32>> {
    backend.map(matrices, to_quaternion)
}

pub fn quaternions_to_matrices(
    quaternions: &[Quaternion<f32>],
    backend: ExecutionBackend,
) -> Vec<Matrix3<f32>> {
    backend.map(quaternions, quaternion_to_matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Unit, UnitQuaternion, Vector3};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f32::consts::PI;

    fn random_rotation(rng: &mut StdRng) -> Matrix3<f32> {
        let axis = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0_f32),
        );
        let axis = Unit::try_new(axis, 1e-3).unwrap_or_else(Vector3::z_axis);
        Rotation3::from_axis_angle(&axis, rng.gen_range(-PI..PI)).into_inner()
    }

    fn assert_round_trip(m: &Matrix3<f32>) {
        let q = to_quaternion(m);
        assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(quaternion_to_matrix(&q), *m, epsilon = 1e-5);
    }

    #[test]
    fn identity_maps_to_identity_quaternion() {
        let q = to_quaternion(&Matrix3::identity());
        assert_eq!(ShepperdCase::select(&Matrix3::identity()), ShepperdCase::Trace);
        assert_relative_eq!(q, Quaternion::identity(), epsilon = 1e-7);
    }

    #[test]
    fn every_case_round_trips() {
        // Half turns about each axis have trace -1 and a single dominant diagonal.
        let cases = [
            (Rotation3::from_axis_angle(&Vector3::x_axis(), 0.3), ShepperdCase::Trace),
            (Rotation3::from_axis_angle(&Vector3::x_axis(), PI), ShepperdCase::X),
            (Rotation3::from_axis_angle(&Vector3::y_axis(), PI), ShepperdCase::Y),
            (Rotation3::from_axis_angle(&Vector3::z_axis(), PI), ShepperdCase::Z),
            (Rotation3::from_axis_angle(&Vector3::x_axis(), 2.9), ShepperdCase::X),
            (Rotation3::from_axis_angle(&Vector3::y_axis(), -2.9), ShepperdCase::Y),
            (Rotation3::from_axis_angle(&Vector3::z_axis(), 3.0), ShepperdCase::Z),
        ];
        for (rotation, case) in cases {
            let m = rotation.into_inner();
            assert_eq!(ShepperdCase::select(&m), case);
            assert_round_trip(&m);
        }
    }

    #[test]
    fn random_rotations_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let matrices: Vec<_> = (0..2000).map(|_| random_rotation(&mut rng)).collect();

        let mut seen = [false; 4];
        for m in &matrices {
            seen[ShepperdCase::select(m) as usize] = true;
            assert_round_trip(m);
        }
        assert_eq!(seen, [true; 4]);
    }

    #[test]
    fn matches_nalgebra_up_to_sign() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let m = random_rotation(&mut rng);
            let q = to_quaternion(&m);
            let expected = UnitQuaternion::from_matrix(&m).into_inner();
            let same = (q - expected).norm() < 1e-4 || (q + expected).norm() < 1e-4;
            assert!(same, "{q:?} vs {expected:?}");
        }
    }

    #[test]
    fn batches_agree_across_backends() {
        let mut rng = StdRng::seed_from_u64(3);
        let matrices: Vec<_> = (0..500).map(|_| random_rotation(&mut rng)).collect();
        let cpu = to_quaternions(&matrices, ExecutionBackend::Cpu);
        let parallel = to_quaternions(&matrices, ExecutionBackend::Parallel);
        assert_eq!(cpu, parallel);

        let back = quaternions_to_matrices(&cpu, ExecutionBackend::Parallel);
        for (m, r) in matrices.iter().zip(&back) {
            assert_relative_eq!(m, r, epsilon = 1e-5);
        }
    }
}
