mod common;

use common::{RawEncoder, ScriptedAnalyzer, analysis};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tranche::{
    chunk_plan::ChunkPlanner,
    codec::Strategy,
    config::{CompressionMode, Config},
    decision::CompressionDecisionEngine,
    error::TaskError,
    memory::MemoryEstimator,
    report::{AttemptDecision, ResultStatus},
    task::TaskParams,
};

fn params(mode: CompressionMode, fallback: bool) -> TaskParams {
    let mut cfg = Config::default();
    cfg.compression.mode = mode;
    cfg.compression.lossless_fallback = fallback;
    cfg.compression.target_ratio = 4.0;
    cfg.quality.psnr_threshold = 40.0;
    TaskParams::from_config(&cfg)
}

fn engine(
    encoder: Arc<RawEncoder>,
    analyzer: Arc<ScriptedAnalyzer>,
    chunk_size_pixels: u64,
) -> CompressionDecisionEngine {
    let planner = ChunkPlanner::new(MemoryEstimator::default(), 4096, chunk_size_pixels, 1, false);
    CompressionDecisionEngine::new(encoder, analyzer, planner)
}

#[test]
fn quality_miss_retries_lossless_exactly_once() {
    let encoder = Arc::new(RawEncoder::default());
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
        Ok(analysis(35.0, 0.99, 5.0)),
        // Even a bad lossless analysis must not trigger a second retry.
        Ok(analysis(30.0, 0.90, 1.0)),
    ]));
    let out = engine(encoder.clone(), analyzer.clone(), 1_000_000).run(
        &common::gradient(32, 32),
        &params(CompressionMode::Supervised, true),
        &CancellationToken::new(),
    );

    assert_eq!(out.status, ResultStatus::Warning);
    assert_eq!(out.attempts.len(), 2);
    assert_eq!(out.attempts[0].decision, AttemptDecision::Retry);
    assert_eq!(out.attempts[1].strategy, Strategy::Lossless);
    assert_eq!(out.attempts[1].decision, AttemptDecision::Accept);
    assert_eq!(analyzer.calls(), 2);
    assert_eq!(
        *analyzer.seen.lock(),
        vec![Strategy::TargetQuality { quality: 90 }, Strategy::Lossless]
    );
    assert!(out.output.unwrap().strategy.is_lossless());
}

#[test]
fn lossless_retry_that_passes_is_success() {
    let encoder = Arc::new(RawEncoder::default());
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
        Ok(analysis(35.0, 0.99, 5.0)),
        Ok(analysis(f64::INFINITY, 1.0, 1.0)),
    ]));
    let out = engine(encoder, analyzer, 1_000_000).run(
        &common::gradient(32, 32),
        &params(CompressionMode::Supervised, true),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Success);
    assert!(out.detail.is_none());
}

#[test]
fn quality_miss_without_fallback_keeps_lossy_output() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![Ok(analysis(35.0, 0.99, 5.0))]));
    let out = engine(Arc::new(RawEncoder::default()), analyzer.clone(), 1_000_000).run(
        &common::gradient(32, 32),
        &params(CompressionMode::Supervised, false),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Warning);
    assert_eq!(out.attempts.len(), 1);
    assert_eq!(analyzer.calls(), 1);
    assert!(!out.output.unwrap().strategy.is_lossless());
}

#[test]
fn ratio_mode_accepts_within_tolerance() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![Ok(analysis(0.0, 0.0, 4.15))]));
    let out = engine(Arc::new(RawEncoder::default()), analyzer, 1_000_000).run(
        &common::gradient(16, 16),
        &params(CompressionMode::Ratio, true),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Success);
    assert_eq!(out.attempts.len(), 1);
    assert_eq!(out.attempts[0].strategy, Strategy::TargetRatio { ratio: 4.0 });
}

#[test]
fn ratio_mode_lossless_retry_outside_tolerance_warns() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
        Ok(analysis(0.0, 0.0, 4.5)),
        Ok(analysis(0.0, 0.0, 2.0)),
    ]));
    let out = engine(Arc::new(RawEncoder::default()), analyzer, 1_000_000).run(
        &common::gradient(16, 16),
        &params(CompressionMode::Ratio, true),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Warning);
    assert_eq!(out.attempts.len(), 2);
    assert!(out.output.unwrap().strategy.is_lossless());
}

#[test]
fn lossy_mode_skips_analysis() {
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let out = engine(Arc::new(RawEncoder::default()), analyzer.clone(), 1_000_000).run(
        &common::gradient(16, 16),
        &params(CompressionMode::Lossy, true),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Success);
    assert_eq!(analyzer.calls(), 0);
    assert_eq!(out.attempts[0].quality_metrics, None);
}

#[test]
fn chunked_attempt_produces_one_strip_per_chunk() {
    let encoder = Arc::new(RawEncoder::default());
    let out = engine(encoder.clone(), Arc::new(ScriptedAnalyzer::default()), 10_000).run(
        &common::gradient(100, 1000),
        &params(CompressionMode::Lossless, true),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Success);
    assert_eq!(encoder.calls(), 10);
    assert!(encoder.seen_rows.lock().iter().all(|&r| r == 100));
    let image = out.output.unwrap();
    assert_eq!(image.strips.len(), 10);
    assert!((image.compression_ratio() - 1.0).abs() < 1e-9);
}

#[test]
fn chunk_failure_fails_task_without_output() {
    let encoder = Arc::new(RawEncoder::failing_on(3));
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let out = engine(encoder, analyzer.clone(), 10_000).run(
        &common::gradient(100, 1000),
        &params(CompressionMode::Supervised, true),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Failure);
    assert!(out.output.is_none());
    assert!(matches!(
        out.error,
        Some(TaskError::ChunkProcessing { index: 2, .. })
    ));
    assert_eq!(out.attempts[0].decision, AttemptDecision::Fail);
    assert_eq!(analyzer.calls(), 0);
}

#[test]
fn analyzer_error_fails_without_retry() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![Err("metrics unavailable".into())]));
    let out = engine(Arc::new(RawEncoder::default()), analyzer.clone(), 1_000_000).run(
        &common::gradient(16, 16),
        &params(CompressionMode::Supervised, true),
        &CancellationToken::new(),
    );
    assert_eq!(out.status, ResultStatus::Failure);
    assert!(matches!(out.error, Some(TaskError::Analyze(_))));
    assert_eq!(analyzer.calls(), 1);
}

#[test]
fn cancelled_before_start_fails_as_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let out = engine(Arc::new(RawEncoder::default()), Arc::new(ScriptedAnalyzer::default()), 100)
        .run(
            &common::gradient(10, 100),
            &params(CompressionMode::Lossless, true),
            &cancel,
        );
    assert_eq!(out.status, ResultStatus::Failure);
    assert!(matches!(out.error, Some(TaskError::Cancelled)));
}

/// Passes every analysis but cancels the task while doing so.
struct CancellingAnalyzer {
    token: CancellationToken,
}

impl tranche::codec::Analyzer for CancellingAnalyzer {
    fn name(&self) -> &str {
        "cancelling"
    }

    fn analyze(
        &self,
        _original: &dyn tranche::source::InputSource,
        _produced: &tranche::codec::EncodedImage,
    ) -> anyhow::Result<tranche::codec::Analysis> {
        self.token.cancel();
        Ok(analysis(f64::INFINITY, 1.0, 5.0))
    }
}

#[test]
fn cancellation_during_analysis_drops_the_output() {
    let cancel = CancellationToken::new();
    let analyzer = Arc::new(CancellingAnalyzer {
        token: cancel.clone(),
    });
    let planner = ChunkPlanner::new(MemoryEstimator::default(), 4096, 1_000_000, 1, false);
    let engine = CompressionDecisionEngine::new(Arc::new(RawEncoder::default()), analyzer, planner);

    let out = engine.run(
        &common::gradient(16, 16),
        &params(CompressionMode::Supervised, true),
        &cancel,
    );
    assert_eq!(out.status, ResultStatus::Failure);
    assert!(matches!(out.error, Some(TaskError::Cancelled)));
    assert!(out.output.is_none());
}
