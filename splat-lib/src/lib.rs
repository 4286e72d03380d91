pub mod backend;
pub mod color;
pub mod common;
pub mod compression;
pub mod config;
pub mod covariance;
pub mod error;
pub mod ply;
pub mod rotation;
mod structures;
pub mod transform;
pub mod unproject;

pub use backend::ExecutionBackend;
pub use config::{OpacityPolicy, PipelineConfig};
pub use error::SplatError;
pub use ply::{first_rewrite_difference, read_ply, write_ply, EncodedScene};
pub use structures::{
    CameraIntrinsics, ColorSpace, DisparityRange, FieldRange, FormatVersion, Gaussian3D,
    GaussianSet, GaussianStats, ImageSize, SceneMetadata, Transform4x4, FRAME_INDEX,
};

use color::encode_colors;
use unproject::unproject;

fn log_stats(stage: &str, gaussians: &GaussianSet) {
    if !log::log_enabled!(target: "splat::pipeline", log::Level::Debug) {
        return;
    }
    if let Some(stats) = GaussianStats::from_gaussians(gaussians) {
        log::debug!(
            target: "splat::pipeline",
            "{} > {} gaussians, mean [{:.3}, {:.3}], color [{:.3}, {:.3}], opacity [{:.3}, {:.3}]",
            stage,
            stats.count,
            stats.mean.min,
            stats.mean.max,
            stats.color.min,
            stats.color.max,
            stats.opacity.min,
            stats.opacity.max,
        );
    }
}

/// Turns the predictor's NDC output for an image of `image_size` into a
/// metric scene ready for [`write_ply`].
///
/// The predictor is assumed to have run at `config.internal_shape` with
/// intrinsics derived from `config.focal_length_35mm`. Returned colors are
/// SH DC coefficients; the metadata carries the intrinsics at the original
/// resolution.
#[inline(never)]
pub fn postprocess(
    gaussians_ndc: GaussianSet,
    image_size: ImageSize,
    config: &PipelineConfig,
) -> Result<(GaussianSet, SceneMetadata), SplatError> {
    if image_size.width == 0 || image_size.height == 0 {
        return Err(SplatError::SingularTransform);
    }

    let intrinsics = CameraIntrinsics::from_focal_length_35mm(image_size, config.focal_length_35mm);
    let working = intrinsics.resized(image_size, config.internal_shape);
    let extrinsics = Transform4x4::identity();

    log::info!(
        target: "splat::pipeline",
        "postprocess > {}x{} image, focal length {:.2}px, {} gaussians",
        image_size.width,
        image_size.height,
        intrinsics.fx,
        gaussians_ndc.len(),
    );
    log_stats("ndc", &gaussians_ndc);

    let metric = unproject(
        gaussians_ndc,
        &extrinsics,
        &working,
        config.internal_shape,
        config.backend,
    )?;
    log_stats("metric", &metric);

    let disparity_range = DisparityRange::from_gaussians(&metric)?;
    let encoded = encode_colors(metric, config.color_space, config.backend);

    let metadata = SceneMetadata {
        extrinsics,
        intrinsics,
        image_size,
        disparity_range,
        color_space: config.color_space,
        version: config.version,
    };

    Ok((encoded, metadata))
}

/// [`postprocess`] followed by [`write_ply`].
pub fn postprocess_to_ply(
    gaussians_ndc: GaussianSet,
    image_size: ImageSize,
    config: &PipelineConfig,
) -> Result<Vec<u8>, SplatError> {
    let (gaussians, metadata) = postprocess(gaussians_ndc, image_size, config)?;
    let mut output = Vec::new();
    write_ply(&gaussians, &metadata, config.opacity_policy, &mut output)?;
    Ok(output)
}
