pub mod analyzer;
pub mod image_backend;
pub mod sidecar;
pub mod types;

use crate::source::{InputSource, PixelRegion};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub use analyzer::PixelAnalyzer;
pub use image_backend::{ImageFileOpener, RasterCodec};
pub use sidecar::{DisabledMetadataWriter, SidecarMetadataWriter};
pub use types::{
    Analysis, BackendInfo, Capabilities, EncodeParams, EncodedImage, EncodedStrip,
    QualityMetrics, Strategy,
};

pub type MetadataMap = BTreeMap<String, serde_json::Value>;

/// Turns a pixel region into compressed bytes. Called once per chunk, possibly
/// from several workers at once.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;
    fn extension(&self, strategy: &Strategy) -> &'static str;
    fn encode(&self, region: &PixelRegion, params: &EncodeParams) -> Result<Vec<u8>>;
}

pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<PixelRegion>;
}

pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, original: &dyn InputSource, produced: &EncodedImage) -> Result<Analysis>;
}

pub trait SourceOpener: Send + Sync {
    fn name(&self) -> &str;
    fn open(&self, path: &Path, page: Option<u32>) -> Result<Box<dyn InputSource>>;
}

pub trait MetadataWriter: Send + Sync {
    fn name(&self) -> &str;
    fn available(&self) -> bool {
        true
    }
    fn write(&self, output_path: &Path, metadata: &MetadataMap) -> Result<()>;
    /// Undoes `write` for an output that is being discarded.
    fn remove(&self, _output_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Everything the core consumes from the outside, injected once per batch.
#[derive(Clone)]
pub struct Collaborators {
    pub opener: Arc<dyn SourceOpener>,
    pub encoder: Arc<dyn Encoder>,
    pub analyzer: Arc<dyn Analyzer>,
    pub metadata: Arc<dyn MetadataWriter>,
}

impl Collaborators {
    /// Backends built on the `image` crate.
    pub fn reference(write_metadata: bool) -> Self {
        let codec = Arc::new(RasterCodec::new());
        let metadata: Arc<dyn MetadataWriter> = if write_metadata {
            Arc::new(SidecarMetadataWriter::new())
        } else {
            Arc::new(DisabledMetadataWriter)
        };
        Self {
            opener: Arc::new(ImageFileOpener::new()),
            encoder: codec.clone(),
            analyzer: Arc::new(PixelAnalyzer::new(codec)),
            metadata,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            opener: BackendInfo {
                name: self.opener.name().to_string(),
                available: true,
            },
            encoder: BackendInfo {
                name: self.encoder.name().to_string(),
                available: true,
            },
            analyzer: BackendInfo {
                name: self.analyzer.name().to_string(),
                available: true,
            },
            metadata_writer: BackendInfo {
                name: self.metadata.name().to_string(),
                available: self.metadata.available(),
            },
        }
    }
}
