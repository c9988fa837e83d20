use crate::{
    codec::Analysis,
    config::CompressionMode,
    report::ResultStatus,
    task::TaskParams,
};
use serde::{Deserialize, Serialize};

/// Why a gated attempt missed its target. Not an error: it routes the
/// decision engine to the lossless retry or to a WARNING result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMiss {
    QualityBelowThreshold,
    ToleranceExceeded,
}

impl GateMiss {
    pub fn describe(self) -> &'static str {
        match self {
            GateMiss::QualityBelowThreshold => "quality below threshold",
            GateMiss::ToleranceExceeded => "compression ratio outside tolerance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accept {
        status: ResultStatus,
        miss: Option<GateMiss>,
    },
    RetryLossless(GateMiss),
}

impl Verdict {
    fn success() -> Self {
        Verdict::Accept {
            status: ResultStatus::Success,
            miss: None,
        }
    }
}

/// Lossy and lossless modes are accepted as produced; only the gated modes
/// need an analysis pass.
pub fn requires_analysis(mode: CompressionMode) -> bool {
    matches!(mode, CompressionMode::Supervised | CompressionMode::Ratio)
}

pub fn meets_quality(params: &TaskParams, analysis: &Analysis) -> bool {
    analysis.metrics.psnr >= params.psnr_threshold && analysis.metrics.ssim >= params.ssim_threshold
}

/// `|achieved - target| / target <= tolerance`.
pub fn within_tolerance(achieved: f64, target: f64, tolerance: f64) -> bool {
    if target <= 0.0 {
        return false;
    }
    (achieved - target).abs() / target <= tolerance
}

/// DECIDE step. `is_retry` is true for the analysis of the lossless retry; a
/// retry never yields another retry.
pub fn decide(params: &TaskParams, analysis: &Analysis, is_retry: bool) -> Verdict {
    let miss = match params.mode {
        CompressionMode::Supervised if meets_quality(params, analysis) => None,
        CompressionMode::Supervised => Some(GateMiss::QualityBelowThreshold),
        CompressionMode::Ratio
            if within_tolerance(analysis.achieved_ratio, params.target_ratio, params.tolerance) =>
        {
            None
        }
        CompressionMode::Ratio => Some(GateMiss::ToleranceExceeded),
        CompressionMode::Lossy | CompressionMode::Lossless => None,
    };

    match miss {
        None => Verdict::success(),
        Some(miss) if !is_retry && params.lossless_fallback => Verdict::RetryLossless(miss),
        Some(miss) => Verdict::Accept {
            status: ResultStatus::Warning,
            miss: Some(miss),
        },
    }
}
