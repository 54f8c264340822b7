//! Binary asset kinds: images written at multiple widths and raw copies.

use crate::error::{EngineError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{Error, Manifest};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const JPEG_QUALITY: u8 = 85;
const UNSHARP_RADIUS: f32 = 0.25;
const UNSHARP_AMOUNT: f32 = 8.0;
// Threshold as a fraction of full scale.
const UNSHARP_THRESHOLD: f32 = 0.065;

/// Everything an asset writer needs: the filesystems, the shared permit
/// pool, and the cancellation token.
#[derive(Clone)]
pub struct AssetContext {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub semaphore: Arc<Semaphore>,
    pub cancel: CancellationToken,
}

/// Spec shared by the image kinds. The declared widths drive the
/// destination filenames even for formats that are never resized.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageSpec {
    pub title: String,
    pub description: Option<String>,
    pub widths: Vec<u32>,
    pub href: Option<String>,
}

impl ImageSpec {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        let spec: ImageSpec =
            serde_json::from_value(manifest.spec.clone()).map_err(|e| Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: e.to_string(),
            })?;
        spec.validate(manifest)?;
        Ok(spec)
    }

    fn validate(&self, manifest: &Manifest) -> Result<()> {
        let mut problems = Vec::new();
        if self.title.is_empty() {
            problems.push("title must be defined");
        }
        if self.widths.is_empty() {
            problems.push("widths must be defined as an array");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: problems.join("\n"),
            }
            .into())
        }
    }
}

/// Spec for raw audio assets; copied byte-for-byte per declared width.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSpec {
    pub title: String,
    pub widths: Vec<u32>,
}

impl AudioSpec {
    pub fn new(manifest: &Manifest) -> Result<Self> {
        let spec: AudioSpec =
            serde_json::from_value(manifest.spec.clone()).map_err(|e| Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: e.to_string(),
            })?;
        if spec.title.is_empty() || spec.widths.is_empty() {
            return Err(Error::BadManifest {
                source_path: manifest.source().to_string(),
                reason: "title and widths must be defined".to_string(),
            }
            .into());
        }
        Ok(spec)
    }
}

/// Join a (possibly slash-rooted) href segment under a base directory.
pub(crate) fn join_rooted(base: &Path, segment: &str) -> PathBuf {
    base.join(segment.trim_start_matches('/'))
}

fn outputs_current(dir: &Path, widths: &[u32]) -> bool {
    widths.iter().all(|width| {
        std::fs::metadata(dir.join(width.to_string()))
            .map(|meta| meta.len() > 0)
            .unwrap_or(false)
    })
}

fn source_file<'m>(manifest: &'m Manifest) -> Result<&'m str> {
    manifest
        .meta
        .file
        .as_deref()
        .ok_or_else(|| EngineError::render(manifest.id(), "meta.file must point at asset data"))
}

/// Decode once, then resize/sharpen/encode every declared width in
/// parallel, each gated by the shared permit pool.
pub async fn render_jpeg(
    spec: &ImageSpec,
    manifest: &Manifest,
    ctx: &AssetContext,
) -> Result<()> {
    let dir = join_rooted(
        &ctx.dest_dir,
        manifest.meta.href_prefix.as_deref().unwrap_or(""),
    );
    if outputs_current(&dir, &spec.widths) {
        tracing::debug!(asset = %manifest.selector(), "jpeg outputs current, skipping");
        return Ok(());
    }
    let chain = manifest.id();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| EngineError::render(&chain, e))?;
    let source = ctx.source_dir.join(source_file(manifest)?);

    let permit = acquire(ctx).await?;
    let decoded = tokio::task::spawn_blocking(move || {
        image::ImageReader::open(&source)
            .map_err(|e| e.to_string())?
            .decode()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| EngineError::render(&chain, e))?
    .map_err(|e| EngineError::render(&chain, e))?;
    drop(permit);

    let decoded = Arc::new(decoded);
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    for width in spec.widths.clone() {
        let decoded = decoded.clone();
        let dir = dir.clone();
        let chain = chain.clone();
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let permit = acquire(&ctx).await?;
            let result = tokio::task::spawn_blocking(move || {
                encode_width(&decoded, &dir.join(width.to_string()), width)
            })
            .await
            .map_err(|e| EngineError::render(&chain, e))?;
            drop(permit);
            result.map_err(|e| EngineError::render(&chain, e))
        });
    }
    join_all(tasks).await
}

/// Copy the backing bytes to one file per declared width. Used for formats
/// that round-trip untouched (PNG, GIF, MPEG audio).
pub async fn render_raw(
    widths: &[u32],
    manifest: &Manifest,
    ctx: &AssetContext,
) -> Result<()> {
    let dir = join_rooted(
        &ctx.dest_dir,
        manifest.meta.href_prefix.as_deref().unwrap_or(""),
    );
    if outputs_current(&dir, widths) {
        tracing::debug!(asset = %manifest.selector(), "raw outputs current, skipping");
        return Ok(());
    }
    let chain = manifest.id();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| EngineError::render(&chain, e))?;
    let source = ctx.source_dir.join(source_file(manifest)?);
    let data = Arc::new(
        tokio::fs::read(&source)
            .await
            .map_err(|e| EngineError::render(&chain, format!("{}: {e}", source.display())))?,
    );

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    for width in widths.to_vec() {
        let data = data.clone();
        let dir = dir.clone();
        let chain = chain.clone();
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let permit = acquire(&ctx).await?;
            let path = dir.join(width.to_string());
            if let Err(e) = tokio::fs::write(&path, data.as_slice()).await {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(EngineError::render(&chain, e));
            }
            drop(permit);
            Ok(())
        });
    }
    join_all(tasks).await
}

async fn acquire(ctx: &AssetContext) -> Result<tokio::sync::OwnedSemaphorePermit> {
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    tokio::select! {
        permit = ctx.semaphore.clone().acquire_owned() => {
            permit.map_err(|_| EngineError::Cancelled)
        }
        _ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
    }
}

async fn join_all(mut tasks: JoinSet<Result<()>>) -> Result<()> {
    let mut first: Option<EngineError> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first.is_none() && !e.is_cancelled() {
                    first = Some(e);
                }
            }
            Err(join_err) => {
                if first.is_none() {
                    first = Some(EngineError::render("asset worker", join_err));
                }
            }
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn scale_to_width(image: &DynamicImage, width: u32) -> DynamicImage {
    let height = ((u64::from(image.height()) * u64::from(width)) / u64::from(image.width()))
        .max(1) as u32;
    let resized = image.resize_exact(width, height, FilterType::Lanczos3);
    unsharp_mask(&resized, UNSHARP_RADIUS, UNSHARP_AMOUNT, UNSHARP_THRESHOLD)
}

/// Amount-scaled unsharp mask: blur with a gaussian of `radius`, then add
/// `amount * (original - blurred)` back wherever the difference exceeds
/// `threshold` (both measured on a 0..1 scale).
fn unsharp_mask(image: &DynamicImage, radius: f32, amount: f32, threshold: f32) -> DynamicImage {
    let original = image.to_rgb8();
    let width = original.width();
    let blurred = gaussian_blur(&original, radius);
    let mut output = original;
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let soft = blurred[(y * width + x) as usize];
        for channel in 0..3 {
            let sharp = f32::from(pixel[channel]) / 255.0;
            let diff = sharp - soft[channel] / 255.0;
            if diff.abs() > threshold {
                pixel[channel] =
                    ((sharp + amount * diff).clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
    DynamicImage::ImageRgb8(output)
}

/// Separable gaussian blur with clamped edge sampling, kept in floats so
/// the mask compares against an unquantized reference.
fn gaussian_blur(image: &RgbImage, sigma: f32) -> Vec<[f32; 3]> {
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let (width, height) = image.dimensions();
    let mut horizontal = vec![[0.0f32; 3]; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut acc = [0.0f32; 3];
            for (offset, weight) in kernel.iter().enumerate() {
                let sx = (i64::from(x) + offset as i64 - radius)
                    .clamp(0, i64::from(width) - 1) as u32;
                let sample = image.get_pixel(sx, y);
                for channel in 0..3 {
                    acc[channel] += weight * f32::from(sample[channel]);
                }
            }
            horizontal[(y * width + x) as usize] = acc;
        }
    }
    let mut blurred = vec![[0.0f32; 3]; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut acc = [0.0f32; 3];
            for (offset, weight) in kernel.iter().enumerate() {
                let sy = (i64::from(y) + offset as i64 - radius)
                    .clamp(0, i64::from(height) - 1) as u32;
                let sample = horizontal[(sy * width + x) as usize];
                for channel in 0..3 {
                    acc[channel] += weight * sample[channel];
                }
            }
            blurred[(y * width + x) as usize] = acc;
        }
    }
    blurred
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as i64;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|distance| (-((distance * distance) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= total;
    }
    kernel
}

fn encode_width(
    image: &DynamicImage,
    path: &Path,
    width: u32,
) -> std::result::Result<(), String> {
    let scaled = scale_to_width(image, width);
    let file = std::fs::File::create(path).map_err(|e| e.to_string())?;
    let mut writer = std::io::BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    if let Err(e) = scaled.write_with_encoder(encoder) {
        drop(writer);
        let _ = std::fs::remove_file(path);
        return Err(e.to_string());
    }
    if let Err(e) = writer.flush() {
        drop(writer);
        let _ = std::fs::remove_file(path);
        return Err(e.to_string());
    }
    Ok(())
}
