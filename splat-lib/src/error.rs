use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SplatError {
    #[error("Degenerate input at element {index}: {reason}")]
    DegenerateInput { index: usize, reason: String },
    #[error("The file does not match the expected splat layout: {0}")]
    FormatMismatch(String),
    #[error("Opacity {value} at element {index} is outside of the open interval (0, 1)")]
    Range { index: usize, value: f32 },
    #[error("Binary data is too short, need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("The projection matrix is not invertible")]
    SingularTransform,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("The Gaussian set is empty.")]
    EmptyGaussianSet,
    #[error("Zstandard compression failed: {0}")]
    ZstdCompress(String),
    #[error("Zstandard decompression failed: {0}")]
    ZstdDecompress(String),
    #[error("An I/O error occurred: {0}")]
    Io(#[from] io::Error),
}
