//! zstd framing for scene files (`.ply.zst`).
//!
//! Every frame carries one complete scene PLY. Decoding parses the payload
//! before returning it, so a frame holding anything else is rejected.

use crate::common::ZSTD_MAX_COMPRESSION_LVL;
use crate::config::OpacityPolicy;
use crate::error::SplatError;
use crate::ply::EncodedScene;
use crate::structures::{GaussianSet, SceneMetadata};
use std::io;
use zstd::stream::{decode_all, Encoder};

/// Leading bytes of every zstd frame.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[inline]
pub fn is_zstd(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdOptions {
    /// Capped at [`ZSTD_MAX_COMPRESSION_LVL`].
    pub level: u32,
    /// zstd worker threads; 0 compresses on the calling thread.
    pub workers: u32,
}

impl Default for ZstdOptions {
    fn default() -> Self {
        Self {
            level: 3,
            workers: 0,
        }
    }
}

impl ZstdOptions {
    fn capped_level(self) -> i32 {
        self.level.min(ZSTD_MAX_COMPRESSION_LVL) as i32
    }
}

fn encoder_error(stage: &'static str) -> impl Fn(io::Error) -> SplatError {
    move |e| SplatError::ZstdCompress(format!("{}: {}", stage, e))
}

/// Streams the serialized scene straight into a zstd frame.
#[inline(never)]
pub fn compress_scene(scene: &EncodedScene, options: ZstdOptions) -> Result<Vec<u8>, SplatError> {
    let mut encoder =
        Encoder::new(Vec::new(), options.capped_level()).map_err(encoder_error("encoder"))?;
    encoder
        .multithread(options.workers)
        .map_err(encoder_error("worker setup"))?;
    scene.write_to(&mut encoder)?;
    let compressed = encoder.finish().map_err(encoder_error("frame end"))?;

    log::debug!(
        target: "splat::compression",
        "compress_scene > {} gaussians, {} bytes, level {}",
        scene.len(),
        compressed.len(),
        options.capped_level(),
    );

    Ok(compressed)
}

/// Unwraps a zstd frame and parses the scene inside it.
#[inline(never)]
pub fn decompress_scene(data: &[u8]) -> Result<EncodedScene, SplatError> {
    let ply = decode_all(data).map_err(|e| SplatError::ZstdDecompress(e.to_string()))?;
    EncodedScene::parse(&ply)
}

/// Reads a scene that may or may not be zstd-framed.
pub fn load_scene(data: &[u8]) -> Result<EncodedScene, SplatError> {
    if is_zstd(data) {
        decompress_scene(data)
    } else {
        EncodedScene::parse(data)
    }
}

/// [`crate::write_ply`] into a zstd frame.
pub fn write_ply_zstd(
    gaussians: &GaussianSet,
    metadata: &SceneMetadata,
    opacity_policy: OpacityPolicy,
    options: ZstdOptions,
) -> Result<Vec<u8>, SplatError> {
    let scene = EncodedScene::encode(gaussians, metadata, opacity_policy)?;
    compress_scene(&scene, options)
}

/// [`crate::read_ply`] for plain or zstd-framed input.
pub fn read_ply_zstd(data: &[u8]) -> Result<(GaussianSet, SceneMetadata), SplatError> {
    let scene = load_scene(data)?;
    Ok((scene.decode()?, scene.metadata))
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use async_compression::zstd::CParameter;
    use async_compression::Level;
    use async_compression::tokio::bufread::ZstdDecoder;
    use async_compression::tokio::write::ZstdEncoder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[inline(never)]
    pub async fn compress_scene_async(
        scene: &EncodedScene,
        options: ZstdOptions,
    ) -> Result<Vec<u8>, SplatError> {
        let ply = scene.to_bytes()?;
        let mut encoder = ZstdEncoder::with_quality_and_params(
            Vec::with_capacity(ply.len() / 2),
            Level::Precise(options.capped_level()),
            &[CParameter::nb_workers(options.workers)],
        );
        encoder.write_all(&ply).await.map_err(encoder_error("frame body"))?;
        encoder.shutdown().await.map_err(encoder_error("frame end"))?;
        Ok(encoder.into_inner())
    }

    #[inline(never)]
    pub async fn decompress_scene_async(data: &[u8]) -> Result<EncodedScene, SplatError> {
        let mut ply = Vec::new();
        ZstdDecoder::new(data)
            .read_to_end(&mut ply)
            .await
            .map_err(|e| SplatError::ZstdDecompress(e.to_string()))?;
        EncodedScene::parse(&ply)
    }
}
}
