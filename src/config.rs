use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub workers: Workers,
    #[serde(default)]
    pub memory: Memory,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub input: Input,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()
            .with_context(|| format!("validating config: {}", path.display()))?;
        Ok(cfg)
    }

    /// Rejects values that would make the whole batch meaningless.
    pub fn validate(&self) -> Result<()> {
        let w = &self.workers;
        if w.min_workers == 0 {
            bail!("workers.min_workers must be >= 1");
        }
        if w.max_workers != 0 && w.min_workers > w.max_workers {
            bail!(
                "workers.min_workers ({}) exceeds workers.max_workers ({})",
                w.min_workers,
                w.max_workers
            );
        }
        check_fraction("workers.memory_threshold", w.memory_threshold)?;
        check_fraction("workers.cpu_threshold", w.cpu_threshold)?;
        if !(0.0..1.0).contains(&w.hysteresis_margin) {
            bail!("workers.hysteresis_margin must be in [0, 1)");
        }
        if w.check_interval_ms == 0 {
            bail!("workers.check_interval_ms must be > 0");
        }

        let m = &self.memory;
        if m.memory_limit_mb == 0 {
            bail!("memory.memory_limit_mb must be > 0");
        }
        if m.working_set_multiplier <= 0.0 {
            bail!("memory.working_set_multiplier must be > 0");
        }
        if m.chunk_size_pixels == 0 {
            bail!("memory.chunk_size_pixels must be > 0");
        }
        if m.min_chunk_height == 0 {
            bail!("memory.min_chunk_height must be >= 1");
        }

        let c = &self.compression;
        if !(1..=100).contains(&c.lossy_quality) {
            bail!("compression.lossy_quality must be in 1..=100");
        }
        if !(0.0..1.0).contains(&c.compression_ratio_tolerance) {
            bail!("compression.compression_ratio_tolerance must be in [0, 1)");
        }
        if c.target_ratio < 0.0 {
            bail!("compression.target_ratio must be >= 0");
        }

        if self.quality.psnr_threshold < 0.0 {
            bail!("quality.psnr_threshold must be >= 0");
        }
        if !(0.0..=1.0).contains(&self.quality.ssim_threshold) {
            bail!("quality.ssim_threshold must be in [0, 1]");
        }

        if self.progress.channel_capacity == 0 {
            bail!("progress.channel_capacity must be >= 1");
        }

        regex::Regex::new(&self.input.include_pattern)
            .with_context(|| format!("input.include_pattern: {}", self.input.include_pattern))?;
        Ok(())
    }

    /// `max_workers = 0` means one less than the logical CPU count.
    pub fn effective_max_workers(&self) -> usize {
        let max = if self.workers.max_workers == 0 {
            num_cpus::get().saturating_sub(1).max(1)
        } else {
            self.workers.max_workers
        };
        max.max(self.workers.min_workers)
    }

    pub fn target_ratio(&self) -> f64 {
        if self.compression.target_ratio > 0.0 {
            self.compression.target_ratio
        } else {
            self.compression.document_type.target_ratio()
        }
    }

    pub fn psnr_threshold(&self) -> f64 {
        if self.quality.psnr_threshold > 0.0 {
            self.quality.psnr_threshold
        } else {
            self.compression.document_type.psnr_threshold()
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value <= 0.0 || value > 1.0 {
        bail!("{name} must be in (0, 1], got {value}");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum CompressionMode {
    /// Lossy, gated on PSNR/SSIM.
    Supervised,
    /// Lossy, gated on achieved compression ratio.
    Ratio,
    Lossy,
    Lossless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum DocumentType {
    Photograph,
    HeritageDocument,
    Color,
    Grayscale,
}

impl DocumentType {
    pub fn target_ratio(self) -> f64 {
        match self {
            DocumentType::Photograph | DocumentType::HeritageDocument => 4.0,
            DocumentType::Color => 6.0,
            DocumentType::Grayscale => 16.0,
        }
    }

    pub fn psnr_threshold(self) -> f64 {
        match self {
            DocumentType::Photograph | DocumentType::Grayscale => 40.0,
            DocumentType::HeritageDocument => 45.0,
            DocumentType::Color => 35.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub job_name: String,
    pub mode: ExecutionMode,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            job_name: "default".into(),
            mode: ExecutionMode::Parallel,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Workers {
    pub min_workers: usize,
    pub max_workers: usize,
    pub memory_threshold: f64,
    pub cpu_threshold: f64,
    pub hysteresis_margin: f64,
    pub check_interval_ms: u64,
    pub queue_capacity: usize,
    pub task_timeout_seconds: u64,
    pub history_len: usize,
}
impl Default for Workers {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 0,
            memory_threshold: 0.8,
            cpu_threshold: 0.9,
            hysteresis_margin: 0.1,
            check_interval_ms: 2000,
            queue_capacity: 0,
            task_timeout_seconds: 0,
            history_len: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub memory_limit_mb: u64,
    pub working_set_multiplier: f64,
    pub chunk_size_pixels: u64,
    pub min_chunk_height: u32,
    pub force_chunking: bool,
}
impl Default for Memory {
    fn default() -> Self {
        Self {
            memory_limit_mb: 4096,
            working_set_multiplier: 3.0,
            chunk_size_pixels: 1_000_000,
            min_chunk_height: 16,
            force_chunking: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Compression {
    pub mode: CompressionMode,
    pub document_type: DocumentType,
    pub lossy_quality: u8,
    pub lossless_fallback: bool,
    pub compression_ratio_tolerance: f64,
    pub target_ratio: f64,
}
impl Default for Compression {
    fn default() -> Self {
        Self {
            mode: CompressionMode::Supervised,
            document_type: DocumentType::Photograph,
            lossy_quality: 90,
            lossless_fallback: true,
            compression_ratio_tolerance: 0.05,
            target_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Quality {
    pub psnr_threshold: f64,
    pub ssim_threshold: f64,
}
impl Default for Quality {
    fn default() -> Self {
        Self {
            psnr_threshold: 0.0,
            ssim_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_input_file_bytes: u64,
    pub max_input_pixels: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 2 * 1024 * 1024 * 1024,
            max_input_pixels: 500_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Input {
    pub include_pattern: String,
}
impl Default for Input {
    fn default() -> Self {
        Self {
            include_pattern: r"(?i)\.(tiff?|png|jpe?g|bmp)$".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub channel_capacity: usize,
}
impl Default for Progress {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_report_json: bool,
    pub report_filename: String,
    pub write_metadata: bool,
    pub overwrite_existing: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            report_filename: "report.json".into(),
            write_metadata: true,
            overwrite_existing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}
