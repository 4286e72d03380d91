use crate::backend::ExecutionBackend;
use crate::error::SplatError;
use crate::structures::{ColorSpace, FormatVersion, ImageSize};

pub const DEFAULT_FOCAL_LENGTH_35MM: f32 = 30.0;
pub const DEFAULT_INTERNAL_SHAPE: ImageSize = ImageSize::new(1536, 1536);
pub const DEFAULT_OPACITY_EPSILON: f32 = 1e-6;

/// What to do with an opacity outside `(0, 1)` before taking its logit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpacityPolicy {
    /// Fail the whole batch with [`SplatError::Range`].
    Reject,
    /// Clamp into `[epsilon, 1 - epsilon]`. NaN is still rejected, and
    /// `epsilon` must leave a non-empty interval strictly inside `(0, 1)`.
    Clamp { epsilon: f32 },
}

impl Default for OpacityPolicy {
    fn default() -> Self {
        Self::Clamp {
            epsilon: DEFAULT_OPACITY_EPSILON,
        }
    }
}

impl OpacityPolicy {
    pub fn clamp(epsilon: f32) -> Result<Self, SplatError> {
        let policy = Self::Clamp { epsilon };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(self) -> Result<(), SplatError> {
        match self {
            Self::Reject => Ok(()),
            // 1 - epsilon must still round below 1 in f32.
            Self::Clamp { epsilon } if epsilon > 0.0 && epsilon < 0.5 && 1.0 - epsilon < 1.0 => {
                Ok(())
            }
            Self::Clamp { epsilon } => Err(SplatError::InvalidConfig(format!(
                "opacity clamp epsilon {} is not inside (0, 0.5)",
                epsilon
            ))),
        }
    }

    /// Returns the opacity to encode and whether it was clamped.
    pub fn apply(self, index: usize, value: f32) -> Result<(f32, bool), SplatError> {
        if value > 0.0 && value < 1.0 {
            return Ok((value, false));
        }
        match self {
            Self::Clamp { epsilon } if !value.is_nan() => {
                self.validate()?;
                Ok((value.clamp(epsilon, 1.0 - epsilon), true))
            }
            _ => Err(SplatError::Range { index, value }),
        }
    }
}

/// Explicit knobs for one invocation of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub backend: ExecutionBackend,
    /// 35 mm-equivalent focal length assumed for the input image.
    pub focal_length_35mm: f32,
    /// Resolution the predictor worked at.
    pub internal_shape: ImageSize,
    pub opacity_policy: OpacityPolicy,
    pub color_space: ColorSpace,
    pub version: FormatVersion,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: ExecutionBackend::default(),
            focal_length_35mm: DEFAULT_FOCAL_LENGTH_35MM,
            internal_shape: DEFAULT_INTERNAL_SHAPE,
            opacity_policy: OpacityPolicy::default(),
            color_space: ColorSpace::default(),
            version: FormatVersion::default(),
        }
    }
}
