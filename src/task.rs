use crate::{
    codec::Strategy,
    config::{CompressionMode, Config, DocumentType},
};
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSource {
    pub path: PathBuf,
    /// Page of a multi-page source; `None` means the first (or only) image.
    pub page: Option<u32>,
}

/// Per-task processing parameters, resolved from configuration once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    pub mode: CompressionMode,
    pub document_type: DocumentType,
    pub lossy_quality: u8,
    pub target_ratio: f64,
    pub tolerance: f64,
    pub psnr_threshold: f64,
    pub ssim_threshold: f64,
    pub lossless_fallback: bool,
}

impl TaskParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            mode: cfg.compression.mode,
            document_type: cfg.compression.document_type,
            lossy_quality: cfg.compression.lossy_quality,
            target_ratio: cfg.target_ratio(),
            tolerance: cfg.compression.compression_ratio_tolerance,
            psnr_threshold: cfg.psnr_threshold(),
            ssim_threshold: cfg.quality.ssim_threshold,
            lossless_fallback: cfg.compression.lossless_fallback,
        }
    }

    pub fn primary_strategy(&self) -> Strategy {
        match self.mode {
            CompressionMode::Supervised | CompressionMode::Lossy => Strategy::TargetQuality {
                quality: self.lossy_quality,
            },
            CompressionMode::Ratio => Strategy::TargetRatio {
                ratio: self.target_ratio,
            },
            CompressionMode::Lossless => Strategy::Lossless,
        }
    }
}

/// One unit of work. Immutable once enumerated.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u64,
    pub source: TaskSource,
    pub params: TaskParams,
    /// Directory receiving this task's output files.
    pub out_dir: PathBuf,
    /// File stem shared by every output of this task; unique within a batch.
    pub output_stem: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: u64,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Task {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            id: self.id,
            path: self.source.path.display().to_string(),
            page: self.source.page,
        }
    }
}

/// A file yields one task; a directory yields one task per direct entry whose
/// name matches `input.include_pattern`, in path order.
pub fn enumerate_tasks(cfg: &Config, input: &Path, out_dir: &Path) -> Result<Vec<Task>> {
    let meta = std::fs::metadata(input)
        .with_context(|| format!("stat input: {}", input.display()))?;

    let files = if meta.is_dir() {
        let pattern = Regex::new(&cfg.input.include_pattern)
            .with_context(|| "compiling input.include_pattern")?;
        let mut files = Vec::new();
        for entry in std::fs::read_dir(input)
            .with_context(|| format!("read_dir {}", input.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let matched = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| pattern.is_match(n))
                .unwrap_or(false);
            if matched {
                files.push(path);
            } else {
                debug!(path = %path.display(), "skipping non-matching entry");
            }
        }
        files.sort();
        files
    } else if meta.is_file() {
        vec![input.to_path_buf()]
    } else {
        bail!("input is neither a file nor a directory: {}", input.display());
    };

    let params = TaskParams::from_config(cfg);
    let timeout = match cfg.workers.task_timeout_seconds {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let mut used = HashSet::new();
    let tasks = files
        .into_iter()
        .enumerate()
        .map(|(i, path)| {
            let output_stem = unique_stem(&path, &mut used);
            Task {
                id: i as u64 + 1,
                source: TaskSource { path, page: None },
                params,
                out_dir: out_dir.to_path_buf(),
                output_stem,
                timeout,
            }
        })
        .collect();
    Ok(tasks)
}

fn unique_stem(path: &Path, used: &mut HashSet<String>) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();
    if used.insert(stem.clone()) {
        return stem;
    }
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("x");
    let mut candidate = format!("{stem}_{ext}");
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{stem}_{ext}{n}");
        n += 1;
    }
    candidate
}
