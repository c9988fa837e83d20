use crate::{
    chunk_plan::{ChunkPlan, ChunkPlanner},
    codec::{Analyzer, EncodeParams, EncodedImage, Encoder, Strategy},
    error::TaskError,
    pipeline::{StreamingTransformPipeline, StripSink},
    policy::{self, Verdict},
    report::{AttemptDecision, CompressionAttempt, ResultStatus},
    source::InputSource,
    task::TaskParams,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Terminal outcome of the attempt/analyze/decide loop for one task.
#[derive(Debug)]
pub struct DecisionOutcome {
    pub status: ResultStatus,
    pub attempts: Vec<CompressionAttempt>,
    /// Accepted output; present for SUCCESS and WARNING.
    pub output: Option<EncodedImage>,
    pub detail: Option<String>,
    pub error: Option<TaskError>,
}

impl DecisionOutcome {
    fn failed(attempts: Vec<CompressionAttempt>, err: TaskError) -> Self {
        Self {
            status: ResultStatus::Failure,
            attempts,
            output: None,
            detail: None,
            error: Some(err),
        }
    }

    pub fn final_attempt(&self) -> Option<&CompressionAttempt> {
        self.attempts.last()
    }
}

pub struct CompressionDecisionEngine {
    encoder: Arc<dyn Encoder>,
    analyzer: Arc<dyn Analyzer>,
    planner: ChunkPlanner,
}

impl CompressionDecisionEngine {
    pub fn new(encoder: Arc<dyn Encoder>, analyzer: Arc<dyn Analyzer>, planner: ChunkPlanner) -> Self {
        Self {
            encoder,
            analyzer,
            planner,
        }
    }

    pub fn run(
        &self,
        source: &dyn InputSource,
        params: &TaskParams,
        cancel: &CancellationToken,
    ) -> DecisionOutcome {
        let geometry = source.geometry();
        let plan = match self.planner.plan(&geometry) {
            Ok(plan) => plan,
            Err(err) => return DecisionOutcome::failed(Vec::new(), err),
        };
        if let Some(p) = &plan {
            debug!(
                chunk_height = p.chunk_height,
                chunk_count = p.chunk_count,
                "streaming in chunks"
            );
        }

        let mut attempts = Vec::new();
        let mut strategy = params.primary_strategy();
        let mut is_retry = false;

        loop {
            let encoded = match self.attempt(source, plan.as_ref(), strategy, params, cancel) {
                Ok(encoded) => encoded,
                Err(err) => {
                    attempts.push(CompressionAttempt {
                        strategy,
                        achieved_ratio: 0.0,
                        quality_metrics: None,
                        decision: AttemptDecision::Fail,
                    });
                    return DecisionOutcome::failed(attempts, err);
                }
            };

            if !policy::requires_analysis(params.mode) {
                attempts.push(CompressionAttempt {
                    strategy,
                    achieved_ratio: encoded.compression_ratio(),
                    quality_metrics: None,
                    decision: AttemptDecision::Accept,
                });
                return DecisionOutcome {
                    status: ResultStatus::Success,
                    attempts,
                    output: Some(encoded),
                    detail: None,
                    error: None,
                };
            }

            let analysis = match self.analyzer.analyze(source, &encoded) {
                Ok(analysis) => analysis,
                Err(err) => {
                    attempts.push(CompressionAttempt {
                        strategy,
                        achieved_ratio: encoded.compression_ratio(),
                        quality_metrics: None,
                        decision: AttemptDecision::Fail,
                    });
                    return DecisionOutcome::failed(attempts, TaskError::Analyze(err));
                }
            };
            if cancel.is_cancelled() {
                return DecisionOutcome::failed(attempts, TaskError::Cancelled);
            }
            debug!(
                strategy = strategy.label(),
                psnr = analysis.metrics.psnr,
                ssim = analysis.metrics.ssim,
                ratio = analysis.achieved_ratio,
                "analysis"
            );

            match policy::decide(params, &analysis, is_retry) {
                Verdict::Accept { status, miss } => {
                    attempts.push(CompressionAttempt {
                        strategy,
                        achieved_ratio: analysis.achieved_ratio,
                        quality_metrics: Some(analysis.metrics),
                        decision: AttemptDecision::Accept,
                    });
                    let detail = miss.map(|m| {
                        warn!(strategy = strategy.label(), "accepted with warning: {}", m.describe());
                        format!("{} (strategy {})", m.describe(), strategy.label())
                    });
                    return DecisionOutcome {
                        status,
                        attempts,
                        output: Some(encoded),
                        detail,
                        error: None,
                    };
                }
                Verdict::RetryLossless(miss) => {
                    attempts.push(CompressionAttempt {
                        strategy,
                        achieved_ratio: analysis.achieved_ratio,
                        quality_metrics: Some(analysis.metrics),
                        decision: AttemptDecision::Retry,
                    });
                    info!(
                        from = strategy.label(),
                        "{}; retrying lossless",
                        miss.describe()
                    );
                    drop(encoded);
                    strategy = Strategy::Lossless;
                    is_retry = true;
                }
            }
        }
    }

    fn attempt(
        &self,
        source: &dyn InputSource,
        plan: Option<&ChunkPlan>,
        strategy: Strategy,
        params: &TaskParams,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage, TaskError> {
        let encode_params = EncodeParams {
            strategy,
            document_type: params.document_type,
        };
        let encoder = &self.encoder;
        let mut sink = StripSink::default();
        let stats = StreamingTransformPipeline::process(
            source,
            plan,
            |region, _range| encoder.encode(region, &encode_params),
            &mut sink,
            cancel,
        )?;
        debug!(
            strategy = strategy.label(),
            chunks = stats.chunks,
            peak_chunk_bytes = stats.peak_chunk_bytes,
            encoded_bytes = sink.encoded_bytes(),
            "attempt encoded"
        );

        Ok(EncodedImage {
            geometry: source.geometry(),
            strategy,
            extension: self.encoder.extension(&strategy).to_string(),
            strips: sink.into_strips(),
        })
    }
}
