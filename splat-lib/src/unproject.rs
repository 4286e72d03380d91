//! Maps predictor output from NDC into metric camera/world space.
//!
//! The predictor emits means as `(x_ndc · z, y_ndc · z, z)` with `z` the
//! metric depth (the inverse of the predicted disparity). Projection into
//! that frame is `N · K · E`, an affine map, so its inverse can be applied
//! through [`crate::transform::apply`] like any other transform.

use crate::backend::ExecutionBackend;
use crate::error::SplatError;
use crate::structures::{CameraIntrinsics, GaussianSet, ImageSize, Transform4x4};
use crate::transform::apply;
use nalgebra::Matrix4;

/// Pixel to NDC map for an image of the given size.
pub fn ndc_matrix(image_shape: ImageSize) -> Matrix4<f32> {
    let width = image_shape.width as f32;
    let height = image_shape.height as f32;
    #[rustfmt::skip]
    let ndc = Matrix4::new(
        2.0 / width, 0.0,          -1.0, 0.0,
        0.0,         2.0 / height, -1.0, 0.0,
        0.0,         0.0,           1.0, 0.0,
        0.0,         0.0,           0.0, 1.0,
    );
    ndc
}

/// `inverse(N · K · E)`. Its rotational part is the inverse of the
/// extrinsics' rotation.
pub fn unprojection_matrix(
    extrinsics: &Transform4x4,
    intrinsics: &CameraIntrinsics,
    image_shape: ImageSize,
) -> Result<Transform4x4, SplatError> {
    let projection = ndc_matrix(image_shape) * intrinsics.to_matrix4() * extrinsics.matrix;
    Transform4x4::from_matrix(projection)
        .try_inverse()
        .ok_or(SplatError::SingularTransform)
}

pub fn unproject(
    gaussians_ndc: GaussianSet,
    extrinsics: &Transform4x4,
    intrinsics: &CameraIntrinsics,
    image_shape: ImageSize,
    backend: ExecutionBackend,
) -> Result<GaussianSet, SplatError> {
    let unprojection = unprojection_matrix(extrinsics, intrinsics, image_shape)?;

    log::debug!(
        target: "splat::unproject",
        "unproject > {} gaussians on {}x{}",
        gaussians_ndc.len(),
        image_shape.width,
        image_shape.height,
    );

    apply(gaussians_ndc, &unprojection, backend)
}
