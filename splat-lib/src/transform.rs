//! Applies an affine map to oriented Gaussians.
//!
//! Means are mapped as points. Covariances are conjugated by the linear part
//! and decomposed again, since a general linear map does not keep a clean
//! quaternion and scale pair. Colors and opacities are untouched.

use crate::backend::ExecutionBackend;
use crate::covariance::{compose, decompose};
use crate::error::SplatError;
use crate::structures::{Gaussian3D, GaussianSet, Transform4x4};

pub fn apply(
    gaussians: GaussianSet,
    transform: &Transform4x4,
    backend: ExecutionBackend,
) -> Result<GaussianSet, SplatError> {
    let linear = transform.linear();
    let linear_t = linear.transpose();
    let offset = transform.offset();

    let transformed = backend.try_map(gaussians.as_slice(), |index, g| -> Result<_, SplatError> {
        let covariance = compose(&g.orientation, &g.scale).ok_or_else(|| {
            SplatError::DegenerateInput {
                index,
                reason: "quaternion has zero or non-finite norm".to_string(),
            }
        })?;
        let covariance = linear * covariance * linear_t;
        let (orientation, scale) = decompose(&covariance)
            .map_err(|reason| SplatError::DegenerateInput { index, reason })?;

        Ok(Gaussian3D {
            mean: linear * g.mean + offset,
            orientation,
            scale,
            color: g.color,
            opacity: g.opacity,
        })
    })?;

    log::debug!(
        target: "splat::transform",
        "apply > {} gaussians",
        transformed.len(),
    );

    Ok(GaussianSet::new(transformed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_gaussians(rng: &mut StdRng, count: usize) -> GaussianSet {
        (0..count)
            .map(|_| {
                let small = rng.gen_range(0.01..0.3_f32);
                let medium = small + rng.gen_range(0.1..0.5);
                let large = medium + rng.gen_range(0.1..0.5);
                Gaussian3D {
                    mean: Vector3::new(
                        rng.gen_range(-5.0..5.0),
                        rng.gen_range(-5.0..5.0),
                        rng.gen_range(1.0..10.0),
                    ),
                    orientation: UnitQuaternion::from_euler_angles(
                        rng.gen_range(-3.0..3.0),
                        rng.gen_range(-1.5..1.5),
                        rng.gen_range(-3.0..3.0),
                    )
                    .into_inner(),
                    scale: Vector3::new(large, medium, small),
                    color: Vector3::new(rng.gen(), rng.gen(), rng.gen()),
                    opacity: rng.gen_range(0.01..0.99),
                }
            })
            .collect()
    }

    fn random_affine(rng: &mut StdRng) -> Transform4x4 {
        let rotation = UnitQuaternion::from_euler_angles(
            rng.gen_range(-3.0..3.0),
            rng.gen_range(-1.5..1.5),
            rng.gen_range(-3.0..3.0_f32),
        )
        .to_rotation_matrix()
        .into_inner();
        let stretch = Matrix3::from_diagonal(&Vector3::new(
            rng.gen_range(0.5..2.0),
            rng.gen_range(0.5..2.0),
            rng.gen_range(0.5..2.0),
        ));
        let offset = Vector3::new(
            rng.gen_range(-3.0..3.0),
            rng.gen_range(-3.0..3.0),
            rng.gen_range(-3.0..3.0),
        );
        Transform4x4::from_linear_offset(rotation * stretch, offset)
    }

    fn covariance(g: &Gaussian3D) -> Matrix3<f32> {
        compose(&g.orientation, &g.scale).unwrap()
    }

    #[test]
    fn identity_keeps_gaussians() {
        let mut rng = StdRng::seed_from_u64(21);
        let input = random_gaussians(&mut rng, 200);
        let output = apply(input.clone(), &Transform4x4::identity(), ExecutionBackend::Parallel)
            .unwrap();

        assert_eq!(output.len(), input.len());
        for (a, b) in input.iter().zip(&output) {
            assert_eq!(a.mean, b.mean);
            assert_eq!(a.color, b.color);
            assert_eq!(a.opacity, b.opacity);
            assert_relative_eq!(a.scale, b.scale, epsilon = 1e-4, max_relative = 1e-3);
            assert_relative_eq!(covariance(a), covariance(b), epsilon = 1e-4, max_relative = 1e-3);
        }
    }

    #[test]
    fn composition_matches_product() {
        let mut rng = StdRng::seed_from_u64(22);
        let input = random_gaussians(&mut rng, 200);
        let t1 = random_affine(&mut rng);
        let t2 = random_affine(&mut rng);

        let stepwise = apply(
            apply(input.clone(), &t1, ExecutionBackend::Parallel).unwrap(),
            &t2,
            ExecutionBackend::Parallel,
        )
        .unwrap();
        let direct = apply(input, &t1.then(&t2), ExecutionBackend::Parallel).unwrap();

        for (a, b) in stepwise.iter().zip(&direct) {
            assert_relative_eq!(a.mean, b.mean, epsilon = 1e-3, max_relative = 1e-4);
            assert_relative_eq!(a.scale, b.scale, epsilon = 1e-3, max_relative = 1e-3);
            assert_relative_eq!(covariance(a), covariance(b), epsilon = 1e-3, max_relative = 1e-3);
        }
    }

    #[test]
    fn uniform_scaling_scales_axes() {
        let g = Gaussian3D {
            mean: Vector3::new(1.0, 2.0, 3.0),
            orientation: Quaternion::identity(),
            scale: Vector3::new(0.3, 0.2, 0.1),
            ..Default::default()
        };
        let transform = Transform4x4::from_linear_offset(
            Matrix3::identity() * 2.0,
            Vector3::new(0.0, 0.0, 1.0),
        );
        let output = apply(GaussianSet::new(vec![g]), &transform, ExecutionBackend::Cpu).unwrap();
        let out = output.gaussians[0];
        assert_relative_eq!(out.mean, Vector3::new(2.0, 4.0, 7.0));
        assert_relative_eq!(out.scale, Vector3::new(0.6, 0.4, 0.2), epsilon = 1e-5);
    }

    #[test]
    fn degenerate_orientation_fails_batch() {
        let mut gaussians = vec![Gaussian3D::default(); 4];
        gaussians[3].orientation = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        let result = apply(
            GaussianSet::new(gaussians),
            &Transform4x4::identity(),
            ExecutionBackend::Cpu,
        );
        assert!(matches!(result, Err(SplatError::DegenerateInput { index: 3, .. })));
    }

    #[test]
    fn backends_agree() {
        let mut rng = StdRng::seed_from_u64(23);
        let input = random_gaussians(&mut rng, 300);
        let transform = random_affine(&mut rng);
        let cpu = apply(input.clone(), &transform, ExecutionBackend::Cpu).unwrap();
        let parallel = apply(input, &transform, ExecutionBackend::Parallel).unwrap();
        assert_eq!(cpu, parallel);
    }
}
