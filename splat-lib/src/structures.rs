use crate::error::SplatError;
use nalgebra::{Matrix3, Matrix4, Quaternion, Vector3};

pub const FRAME_INDEX: i32 = 1;

/// Diagonal of a full-frame 35 mm sensor, `sqrt(36^2 + 24^2)` millimetres.
pub const FULL_FRAME_DIAGONAL_MM: f64 = 43.266_615_305_567_87;

/// One oriented splat primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian3D {
    pub mean: Vector3<f32>,
    /// Unit quaternion, serialized as `[w, x, y, z]`.
    pub orientation: Quaternion<f32>,
    /// Principal axis lengths, all non-negative.
    pub scale: Vector3<f32>,
    /// Linear RGB until the color stage runs, SH DC coefficients afterwards.
    pub color: Vector3<f32>,
    /// Probability in the open interval `(0, 1)`.
    pub opacity: f32,
}

impl Default for Gaussian3D {
    fn default() -> Self {
        Self {
            mean: Vector3::zeros(),
            orientation: Quaternion::identity(),
            scale: Vector3::repeat(1.0),
            color: Vector3::repeat(0.5),
            opacity: 0.5,
        }
    }
}

/// Ordered batch of Gaussians. Every stage consumes one and returns a new one.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GaussianSet {
    pub gaussians: Vec<Gaussian3D>,
}

impl GaussianSet {
    pub fn new(gaussians: Vec<Gaussian3D>) -> Self {
        Self { gaussians }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Gaussian3D> {
        self.gaussians.iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Gaussian3D] {
        &self.gaussians
    }
}

impl From<Vec<Gaussian3D>> for GaussianSet {
    fn from(gaussians: Vec<Gaussian3D>) -> Self {
        Self { gaussians }
    }
}

impl FromIterator<Gaussian3D> for GaussianSet {
    fn from_iter<I: IntoIterator<Item = Gaussian3D>>(iter: I) -> Self {
        Self {
            gaussians: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for GaussianSet {
    type Item = Gaussian3D;
    type IntoIter = std::vec::IntoIter<Gaussian3D>;

    fn into_iter(self) -> Self::IntoIter {
        self.gaussians.into_iter()
    }
}

impl<'a> IntoIterator for &'a GaussianSet {
    type Item = &'a Gaussian3D;
    type IntoIter = std::slice::Iter<'a, Gaussian3D>;

    fn into_iter(self) -> Self::IntoIter {
        self.gaussians.iter()
    }
}

/// Affine or perspective map. [`crate::transform::apply`] uses only the
/// upper three rows: `linear` (3x3) and `offset` (rightmost column).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform4x4 {
    pub matrix: Matrix4<f32>,
}

impl Default for Transform4x4 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform4x4 {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    pub fn from_matrix(matrix: Matrix4<f32>) -> Self {
        Self { matrix }
    }

    pub fn from_linear_offset(linear: Matrix3<f32>, offset: Vector3<f32>) -> Self {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&linear);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&offset);
        Self { matrix }
    }

    pub fn from_row_major(values: &[f32; 16]) -> Self {
        Self {
            matrix: Matrix4::from_row_slice(values),
        }
    }

    pub fn to_row_major(&self) -> [f32; 16] {
        let mut values = [0.0; 16];
        values.copy_from_slice(self.matrix.transpose().as_slice());
        values
    }

    #[inline]
    pub fn linear(&self) -> Matrix3<f32> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    #[inline]
    pub fn offset(&self) -> Vector3<f32> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// `next · self`: the map that applies `self` first, then `next`.
    pub fn then(&self, next: &Transform4x4) -> Self {
        Self {
            matrix: next.matrix * self.matrix,
        }
    }

    pub fn try_inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().map(Self::from_matrix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    /// Pixel focal length for a 35 mm-equivalent focal length, matched along
    /// the image diagonal. The principal point sits at the image center.
    pub fn from_focal_length_35mm(image_size: ImageSize, focal_length_mm: f32) -> Self {
        let width = image_size.width as f64;
        let height = image_size.height as f64;
        let diagonal_px = (width * width + height * height).sqrt();
        let f_px = (focal_length_mm as f64 * diagonal_px / FULL_FRAME_DIAGONAL_MM) as f32;
        Self {
            fx: f_px,
            fy: f_px,
            cx: (width * 0.5) as f32,
            cy: (height * 0.5) as f32,
        }
    }

    /// Rescales the intrinsics from the image they were measured on to a
    /// differently sized working image.
    pub fn resized(&self, from: ImageSize, to: ImageSize) -> Self {
        let sx = to.width as f32 / from.width as f32;
        let sy = to.height as f32 / from.height as f32;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }

    pub fn to_matrix3(&self) -> Matrix3<f32> {
        #[rustfmt::skip]
        let matrix = Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        );
        matrix
    }

    /// Focal length relative to image width, the conditioning input the
    /// predictor uses to scale its disparity output.
    pub fn disparity_factor(&self, image_size: ImageSize) -> f32 {
        self.fx / image_size.width as f32
    }

    /// The 4x4 lift used when composing with extrinsics.
    pub fn to_matrix4(&self) -> Matrix4<f32> {
        self.to_matrix3().to_homogeneous()
    }

    pub fn to_row_major(&self) -> [f32; 9] {
        [self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0]
    }

    /// Returns `None` unless the matrix has the zero-skew pinhole shape.
    pub fn from_row_major(values: &[f32; 9]) -> Option<Self> {
        let [fx, skew, cx, r10, fy, cy, r20, r21, r22] = *values;
        if skew != 0.0 || r10 != 0.0 || r20 != 0.0 || r21 != 0.0 || r22 != 1.0 {
            return None;
        }
        Some(Self { fx, fy, cx, cy })
    }
}

/// 10th and 90th percentile of per-splat disparity (`1 / z`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisparityRange {
    pub p10: f32,
    pub p90: f32,
}

impl DisparityRange {
    pub fn from_gaussians(gaussians: &GaussianSet) -> Result<Self, SplatError> {
        if gaussians.is_empty() {
            return Err(SplatError::EmptyGaussianSet);
        }
        let mut disparity: Vec<f32> = gaussians.iter().map(|g| 1.0 / g.mean.z).collect();
        disparity.sort_unstable_by(f32::total_cmp);
        Ok(Self {
            p10: quantile_sorted(&disparity, 0.1),
            p90: quantile_sorted(&disparity, 0.9),
        })
    }
}

/// Linear interpolation between the order statistics around `q * (n - 1)`.
fn quantile_sorted(sorted: &[f32], q: f64) -> f32 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = (position - lower as f64) as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorSpace {
    #[default]
    Srgb = 0,
    LinearRgb = 1,
}

impl ColorSpace {
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Srgb),
            1 => Some(Self::LinearRgb),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self {
            major: 1,
            minor: 5,
            patch: 0,
        }
    }
}

/// Per-image scene description embedded next to the Gaussians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneMetadata {
    pub extrinsics: Transform4x4,
    pub intrinsics: CameraIntrinsics,
    pub image_size: ImageSize,
    pub disparity_range: DisparityRange,
    pub color_space: ColorSpace,
    pub version: FormatVersion,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRange {
    pub min: f32,
    pub max: f32,
}

impl FieldRange {
    fn of(values: impl Iterator<Item = f32>) -> Option<Self> {
        values.fold(None, |range, v| {
            Some(match range {
                None => Self { min: v, max: v },
                Some(r) => Self {
                    min: r.min.min(v),
                    max: r.max.max(v),
                },
            })
        })
    }
}

/// Value ranges over a whole set, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianStats {
    pub count: usize,
    pub mean: FieldRange,
    pub scale: FieldRange,
    pub color: FieldRange,
    pub opacity: FieldRange,
}

impl GaussianStats {
    /// `None` for an empty set.
    pub fn from_gaussians(gaussians: &GaussianSet) -> Option<Self> {
        let flat = |f: fn(&Gaussian3D) -> Vector3<f32>| {
            FieldRange::of(gaussians.iter().flat_map(move |g| <[f32; 3]>::from(f(g))))
        };
        Some(Self {
            count: gaussians.len(),
            mean: flat(|g| g.mean)?,
            scale: flat(|g| g.scale)?,
            color: flat(|g| g.color)?,
            opacity: FieldRange::of(gaussians.iter().map(|g| g.opacity))?,
        })
    }
}
