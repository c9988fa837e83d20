use super::{Analysis, Analyzer, Decoder, EncodedImage, QualityMetrics};
use crate::source::InputSource;
use anyhow::{Context, Result, bail};
use std::sync::Arc;

const PEAK: f64 = 255.0;
const C1: f64 = (0.01 * PEAK) * (0.01 * PEAK);
const C2: f64 = (0.03 * PEAK) * (0.03 * PEAK);

/// Compares produced strips against the matching source rows, one strip at a
/// time, so analysis memory is bounded by the largest strip.
pub struct PixelAnalyzer {
    decoder: Arc<dyn Decoder>,
}

impl PixelAnalyzer {
    pub fn new(decoder: Arc<dyn Decoder>) -> Self {
        Self { decoder }
    }
}

/// Running sums for MSE and a single global SSIM window.
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleStats {
    n: u64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
    sum_sq_diff: f64,
}

impl SampleStats {
    pub fn push_slices(&mut self, original: &[u8], produced: &[u8]) {
        for (&a, &b) in original.iter().zip(produced) {
            let x = a as f64;
            let y = b as f64;
            self.n += 1;
            self.sum_x += x;
            self.sum_y += y;
            self.sum_xx += x * x;
            self.sum_yy += y * y;
            self.sum_xy += x * y;
            self.sum_sq_diff += (x - y) * (x - y);
        }
    }

    pub fn metrics(&self) -> QualityMetrics {
        if self.n == 0 {
            return QualityMetrics {
                psnr: f64::INFINITY,
                ssim: 1.0,
                mse: 0.0,
            };
        }
        let n = self.n as f64;
        let mse = self.sum_sq_diff / n;
        let psnr = if mse == 0.0 {
            f64::INFINITY
        } else {
            20.0 * (PEAK / mse.sqrt()).log10()
        };

        let mu_x = self.sum_x / n;
        let mu_y = self.sum_y / n;
        let var_x = (self.sum_xx / n - mu_x * mu_x).max(0.0);
        let var_y = (self.sum_yy / n - mu_y * mu_y).max(0.0);
        let cov = self.sum_xy / n - mu_x * mu_y;
        let ssim = ((2.0 * mu_x * mu_y + C1) * (2.0 * cov + C2))
            / ((mu_x * mu_x + mu_y * mu_y + C1) * (var_x + var_y + C2));

        QualityMetrics { psnr, ssim, mse }
    }
}

impl Analyzer for PixelAnalyzer {
    fn name(&self) -> &str {
        "pixel"
    }

    fn analyze(&self, original: &dyn InputSource, produced: &EncodedImage) -> Result<Analysis> {
        let geometry = original.geometry();
        if geometry.bytes_per_channel != 1 {
            bail!(
                "analysis supports 8-bit samples only, got {} bytes per channel",
                geometry.bytes_per_channel
            );
        }

        let mut stats = SampleStats::default();
        for strip in &produced.strips {
            let decoded = self
                .decoder
                .decode(&strip.bytes)
                .with_context(|| format!("decode strip at row {}", strip.start_row))?;
            let source = original.read_rows(strip.start_row, strip.rows)?;
            if decoded.data.len() != source.data.len() {
                bail!(
                    "strip at row {} decoded to {} bytes, source has {}",
                    strip.start_row,
                    decoded.data.len(),
                    source.data.len()
                );
            }
            stats.push_slices(&source.data, &decoded.data);
        }

        Ok(Analysis {
            metrics: stats.metrics(),
            achieved_ratio: produced.compression_ratio(),
        })
    }
}
