use crate::{config::DocumentType, source::ImageGeometry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    TargetQuality { quality: u8 },
    TargetRatio { ratio: f64 },
    Lossless,
}

impl Strategy {
    pub fn is_lossless(&self) -> bool {
        matches!(self, Strategy::Lossless)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::TargetQuality { .. } => "target_quality",
            Strategy::TargetRatio { .. } => "target_ratio",
            Strategy::Lossless => "lossless",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodeParams {
    pub strategy: Strategy,
    pub document_type: DocumentType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStrip {
    pub start_row: u32,
    pub rows: u32,
    pub bytes: Vec<u8>,
}

/// Encoder output for one attempt: one strip per processed chunk, in row
/// order. A whole-buffer pass yields exactly one strip.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub geometry: ImageGeometry,
    pub strategy: Strategy,
    pub extension: String,
    pub strips: Vec<EncodedStrip>,
}

impl EncodedImage {
    pub fn encoded_bytes(&self) -> u64 {
        self.strips.iter().map(|s| s.bytes.len() as u64).sum()
    }

    /// Uncompressed sample bytes over encoded bytes (N:1 notation).
    pub fn compression_ratio(&self) -> f64 {
        let encoded = self.encoded_bytes();
        if encoded == 0 {
            return 0.0;
        }
        self.geometry.raw_bytes() as f64 / encoded as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub psnr: f64,
    pub ssim: f64,
    pub mse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub metrics: QualityMetrics,
    pub achieved_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    pub available: bool,
}

/// Resolved once per batch; the core never probes for tools itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub opener: BackendInfo,
    pub encoder: BackendInfo,
    pub analyzer: BackendInfo,
    pub metadata_writer: BackendInfo,
}
