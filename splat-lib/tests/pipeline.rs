use approx::assert_relative_eq;
use nalgebra::{UnitQuaternion, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use splat_lib::compression::{compress_scene, decompress_scene, ZstdOptions};
use splat_lib::{
    first_rewrite_difference, postprocess, postprocess_to_ply, read_ply, write_ply,
    EncodedScene, ExecutionBackend, Gaussian3D, GaussianSet, ImageSize, OpacityPolicy,
    PipelineConfig, SplatError,
};

const IMAGE_SIZE: ImageSize = ImageSize::new(1024, 768);

/// A predictor-like NDC field: one Gaussian per cell of a coarse grid.
fn ndc_field(seed: u64, count: usize) -> GaussianSet {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let depth = rng.gen_range(0.5..20.0_f32);
            let opacity = match i % 100 {
                0 => 0.001,
                1 => 0.999,
                _ => rng.gen_range(0.01..0.99),
            };
            Gaussian3D {
                mean: Vector3::new(
                    rng.gen_range(-1.0..1.0) * depth,
                    rng.gen_range(-1.0..1.0) * depth,
                    depth,
                ),
                orientation: UnitQuaternion::from_euler_angles(
                    rng.gen_range(-3.0..3.0),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-3.0..3.0),
                )
                .into_inner(),
                scale: Vector3::new(
                    rng.gen_range(0.001..0.05),
                    rng.gen_range(0.001..0.05),
                    rng.gen_range(0.001..0.05),
                ),
                color: Vector3::new(rng.gen(), rng.gen(), rng.gen()),
                opacity,
            }
        })
        .collect()
}

#[test]
fn ply_round_trip_over_thousands_of_gaussians() {
    let config = PipelineConfig::default();
    let (gaussians, metadata) = postprocess(ndc_field(7, 4000), IMAGE_SIZE, &config).unwrap();
    assert_eq!(gaussians.len(), 4000);

    let mut bytes = Vec::new();
    write_ply(&gaussians, &metadata, OpacityPolicy::Reject, &mut bytes).unwrap();
    let (decoded, decoded_metadata) = read_ply(&bytes).unwrap();

    assert_eq!(decoded_metadata, metadata);
    assert_eq!(decoded.len(), gaussians.len());
    for (expected, actual) in gaussians.iter().zip(&decoded) {
        assert_eq!(actual.mean, expected.mean);
        assert_eq!(actual.orientation, expected.orientation);
        assert_eq!(actual.color, expected.color);
        assert_relative_eq!(actual.scale, expected.scale, max_relative = 1e-5);
        assert_relative_eq!(actual.opacity, expected.opacity, max_relative = 1e-4);
    }

    let extremes: Vec<f32> = decoded.iter().step_by(100).map(|g| g.opacity).collect();
    assert!(extremes.iter().all(|&o| (o - 0.001).abs() < 1e-6));
}

#[test]
fn output_is_deterministic() {
    let config = PipelineConfig::default();
    let first = postprocess_to_ply(ndc_field(11, 1500), IMAGE_SIZE, &config).unwrap();
    let second = postprocess_to_ply(ndc_field(11, 1500), IMAGE_SIZE, &config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn backends_produce_identical_files() {
    let cpu = PipelineConfig {
        backend: ExecutionBackend::Cpu,
        ..Default::default()
    };
    let parallel = PipelineConfig {
        backend: ExecutionBackend::Parallel,
        ..Default::default()
    };
    let a = postprocess_to_ply(ndc_field(3, 1200), IMAGE_SIZE, &cpu).unwrap();
    let b = postprocess_to_ply(ndc_field(3, 1200), IMAGE_SIZE, &parallel).unwrap();
    assert_eq!(a, b);
}

#[test]
fn pipeline_output_rewrites_byte_identical() {
    let bytes =
        postprocess_to_ply(ndc_field(5, 1000), IMAGE_SIZE, &PipelineConfig::default()).unwrap();
    assert_eq!(first_rewrite_difference(&bytes).unwrap(), None);

    // Decoding and re-encoding is lossy in the last bits but stays valid and
    // close under the strict policy.
    let (gaussians, metadata) = read_ply(&bytes).unwrap();
    let mut rewritten = Vec::new();
    write_ply(&gaussians, &metadata, OpacityPolicy::Reject, &mut rewritten).unwrap();
    assert_eq!(rewritten.len(), bytes.len());
    let (again, again_metadata) = read_ply(&rewritten).unwrap();
    assert_eq!(again_metadata, metadata);
    for (x, y) in gaussians.iter().zip(&again) {
        assert_eq!(x.mean, y.mean);
        assert_eq!(x.orientation, y.orientation);
        assert_relative_eq!(x.scale, y.scale, max_relative = 1e-5);
        assert_relative_eq!(x.opacity, y.opacity, max_relative = 1e-4);
    }
}

#[test]
fn compression_preserves_bytes() {
    let bytes =
        postprocess_to_ply(ndc_field(9, 2000), IMAGE_SIZE, &PipelineConfig::default()).unwrap();
    let scene = EncodedScene::parse(&bytes).unwrap();
    let options = ZstdOptions {
        level: 3,
        workers: 2,
    };
    let compressed = compress_scene(&scene, options).unwrap();
    assert!(compressed.len() < bytes.len());
    assert_eq!(decompress_scene(&compressed).unwrap().to_bytes().unwrap(), bytes);
}

#[test]
fn reject_policy_fails_whole_batch() {
    let mut field = ndc_field(13, 1000);
    field.gaussians[417].opacity = 1.0;
    let config = PipelineConfig {
        opacity_policy: OpacityPolicy::Reject,
        ..Default::default()
    };
    let result = postprocess_to_ply(field, IMAGE_SIZE, &config);
    assert!(matches!(result, Err(SplatError::Range { index: 417, .. })));
}

#[test]
fn non_finite_input_fails_whole_batch() {
    let mut field = ndc_field(17, 1000);
    field.gaussians[12].scale.y = f32::NAN;
    let result = postprocess(field, IMAGE_SIZE, &PipelineConfig::default());
    assert!(matches!(result, Err(SplatError::DegenerateInput { index: 12, .. })));
}
