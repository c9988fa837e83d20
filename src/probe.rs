use crate::{
    chunk_plan::{ChunkAssessment, ChunkPlanner},
    codec::SourceOpener,
    config::Config,
    error::TaskError,
    source::{ImageGeometry, InputSource},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeInput {
    pub path: String,
    pub file_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub input: ProbeInput,
    pub geometry: ImageGeometry,
    pub assessment: ChunkAssessment,
}

pub fn stat_input(path: &Path) -> Result<ProbeInput> {
    let meta = std::fs::metadata(path).with_context(|| "stat input")?;
    Ok(ProbeInput {
        path: path.display().to_string(),
        file_bytes: meta.len(),
    })
}

pub fn file_limit_violation(cfg: &Config, input: &ProbeInput) -> Option<String> {
    (input.file_bytes > cfg.limits.max_input_file_bytes).then(|| {
        format!(
            "input exceeds max_input_file_bytes: {} > {}",
            input.file_bytes, cfg.limits.max_input_file_bytes
        )
    })
}

pub fn pixel_limit_violation(cfg: &Config, geometry: &ImageGeometry) -> Option<String> {
    (geometry.pixel_count() > cfg.limits.max_input_pixels).then(|| {
        format!(
            "input exceeds max_input_pixels: {} > {}",
            geometry.pixel_count(),
            cfg.limits.max_input_pixels
        )
    })
}

/// Geometry, memory estimate and chunking decision for an opened source.
pub fn probe_source(
    cfg: &Config,
    input: ProbeInput,
    source: &dyn InputSource,
) -> Result<ProbeResult, TaskError> {
    let geometry = source.geometry();
    let assessment = ChunkPlanner::from_config(cfg).assess(&geometry)?;
    Ok(ProbeResult {
        input,
        geometry,
        assessment,
    })
}

/// Full probe of one file, failing on any limit violation.
pub fn probe_image(
    cfg: &Config,
    opener: &dyn SourceOpener,
    path: &Path,
    page: Option<u32>,
) -> Result<ProbeResult> {
    let input = stat_input(path)?;
    if let Some(msg) = file_limit_violation(cfg, &input) {
        anyhow::bail!(msg);
    }
    let source = opener
        .open(path, page)
        .with_context(|| format!("opening {}", path.display()))?;
    if let Some(msg) = pixel_limit_violation(cfg, &source.geometry()) {
        anyhow::bail!(msg);
    }
    probe_source(cfg, input, source.as_ref()).map_err(anyhow::Error::from)
}
