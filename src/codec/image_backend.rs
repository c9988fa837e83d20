use super::{Decoder, Encoder, EncodeParams, SourceOpener, Strategy};
use crate::source::{InputSource, PixelRegion, RasterSource};
use anyhow::{Context, Result, anyhow, bail};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use std::path::Path;
use tracing::debug;

/// Decodes image files into 8-bit gray or RGB rasters.
#[derive(Debug, Default, Clone)]
pub struct ImageFileOpener;

impl ImageFileOpener {
    pub fn new() -> Self {
        Self
    }
}

impl SourceOpener for ImageFileOpener {
    fn name(&self) -> &str {
        "image"
    }

    fn open(&self, path: &Path, page: Option<u32>) -> Result<Box<dyn InputSource>> {
        if let Some(p) = page.filter(|p| *p > 0) {
            bail!("page {p} requested but only the first page is decodable");
        }
        let img = ImageReader::open(path)
            .with_context(|| format!("open {}", path.display()))?
            .with_guessed_format()
            .with_context(|| "guess image format")?
            .decode()
            .with_context(|| format!("decode {}", path.display()))?;
        let region = to_region(img)?;
        debug!(
            path = %path.display(),
            width = region.width,
            height = region.rows,
            channels = region.channel_count,
            "decoded source"
        );
        Ok(Box::new(RasterSource::from_region(region)))
    }
}

fn to_region(img: DynamicImage) -> Result<PixelRegion> {
    let (width, height) = (img.width(), img.height());
    if img.color().has_color() {
        PixelRegion::new(width, height, 3, 1, img.to_rgb8().into_raw())
    } else {
        PixelRegion::new(width, height, 1, 1, img.to_luma8().into_raw())
    }
}

/// JPEG for lossy strategies, PNG for lossless.
#[derive(Debug, Default, Clone)]
pub struct RasterCodec;

impl RasterCodec {
    pub fn new() -> Self {
        Self
    }

    /// Ratio targets are mapped onto a fixed quality ladder; the decision
    /// engine's tolerance check catches the misses.
    pub fn quality_for_ratio(ratio: f64) -> u8 {
        match ratio {
            r if r <= 2.0 => 95,
            r if r <= 4.0 => 90,
            r if r <= 6.0 => 80,
            r if r <= 10.0 => 70,
            r if r <= 16.0 => 55,
            _ => 40,
        }
    }
}

fn color_type(region: &PixelRegion) -> Result<ExtendedColorType> {
    match (region.channel_count, region.bytes_per_channel) {
        (1, 1) => Ok(ExtendedColorType::L8),
        (3, 1) => Ok(ExtendedColorType::Rgb8),
        (c, b) => Err(anyhow!(
            "unsupported layout: {c} channel(s) x {b} byte(s) per channel"
        )),
    }
}

impl Encoder for RasterCodec {
    fn name(&self) -> &str {
        "raster"
    }

    fn extension(&self, strategy: &Strategy) -> &'static str {
        if strategy.is_lossless() { "png" } else { "jpg" }
    }

    fn encode(&self, region: &PixelRegion, params: &EncodeParams) -> Result<Vec<u8>> {
        let color = color_type(region)?;
        let mut out = Vec::new();
        match params.strategy {
            Strategy::Lossless => PngEncoder::new(&mut out)
                .write_image(&region.data, region.width, region.rows, color)
                .with_context(|| "png encode")?,
            Strategy::TargetQuality { quality } => {
                JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
                    .write_image(&region.data, region.width, region.rows, color)
                    .with_context(|| "jpeg encode")?
            }
            Strategy::TargetRatio { ratio } => {
                JpegEncoder::new_with_quality(&mut out, Self::quality_for_ratio(ratio))
                    .write_image(&region.data, region.width, region.rows, color)
                    .with_context(|| "jpeg encode")?
            }
        }
        Ok(out)
    }
}

impl Decoder for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<PixelRegion> {
        let img = image::load_from_memory(bytes).with_context(|| "decode strip")?;
        to_region(img)
    }
}
