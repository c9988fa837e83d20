use crate::{
    chunk_plan::ChunkPlanner,
    codec::{Collaborators, MetadataMap, Strategy},
    config::{Config, ExecutionMode},
    decision::{CompressionDecisionEngine, DecisionOutcome},
    error::{FailureKind, TaskError, TaskFailure},
    output,
    pool::{AdaptiveWorkerPool, PoolSettings, TaskRunner},
    probe,
    progress::ProgressTracker,
    report::{BatchReport, ProcessingResult, ResultStatus, StatusCounts},
    sampler::{ResourceProbe, ResourceSampler, SamplerSettings},
    source::ImageGeometry,
    task::Task,
    util::{elapsed_ms, now_rfc3339},
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

/// The per-task logic shared by both execution modes: limits, skip checks,
/// the decision engine, persistence and metadata.
pub struct TranscodeRunner {
    cfg: Config,
    collaborators: Collaborators,
    engine: CompressionDecisionEngine,
}

impl TranscodeRunner {
    pub fn new(cfg: Config, collaborators: Collaborators) -> Self {
        let engine = CompressionDecisionEngine::new(
            collaborators.encoder.clone(),
            collaborators.analyzer.clone(),
            ChunkPlanner::from_config(&cfg),
        );
        Self {
            cfg,
            collaborators,
            engine,
        }
    }

    fn metadata_for(
        &self,
        task: &Task,
        geometry: &ImageGeometry,
        outcome: &DecisionOutcome,
    ) -> MetadataMap {
        let mut map = MetadataMap::new();
        map.insert("source".into(), json!(task.source.path.display().to_string()));
        if let Some(page) = task.source.page {
            map.insert("page".into(), json!(page));
        }
        map.insert("width".into(), json!(geometry.width));
        map.insert("height".into(), json!(geometry.height));
        map.insert("channels".into(), json!(geometry.channel_count));
        map.insert("document_type".into(), json!(task.params.document_type));
        map.insert("status".into(), json!(outcome.status));
        if let Some(attempt) = outcome.final_attempt() {
            map.insert("strategy".into(), json!(attempt.strategy));
            map.insert("compression_ratio".into(), json!(attempt.achieved_ratio));
            if let Some(m) = attempt.quality_metrics {
                map.insert("psnr".into(), json!(m.psnr));
                map.insert("ssim".into(), json!(m.ssim));
                map.insert("mse".into(), json!(m.mse));
            }
        }
        map.insert("processed_at".into(), json!(now_rfc3339()));
        map
    }
}

impl TaskRunner for TranscodeRunner {
    fn run(&self, task: &Task, cancel: &CancellationToken) -> ProcessingResult {
        let started = Instant::now();
        let task_ref = task.task_ref();
        let span = info_span!("task", id = task.id);
        let _enter = span.enter();

        if cancel.is_cancelled() {
            return ProcessingResult::failed(task_ref, &TaskError::Cancelled, 0);
        }

        let input = match probe::stat_input(&task.source.path) {
            Ok(input) => input,
            Err(err) => {
                warn!(path = %task_ref.path, "unreadable input: {err:#}");
                return ProcessingResult::skipped(
                    task_ref,
                    Some(TaskFailure::new(FailureKind::Source, format!("{err:#}"))),
                    "unreadable input",
                );
            }
        };
        if let Some(msg) = probe::file_limit_violation(&self.cfg, &input) {
            info!(path = %task_ref.path, "{msg}");
            return ProcessingResult::skipped(
                task_ref,
                Some(TaskFailure::new(FailureKind::Limits, msg)),
                "input over limits",
            );
        }

        if !self.cfg.output.overwrite_existing {
            let encoder = &self.collaborators.encoder;
            let extensions = [
                encoder.extension(&task.params.primary_strategy()),
                encoder.extension(&Strategy::Lossless),
            ];
            if let Some(existing) =
                output::existing_output(&task.out_dir, &task.output_stem, &extensions)
            {
                info!(path = %existing.display(), "output exists; skipping");
                return ProcessingResult::skipped(
                    task_ref,
                    None,
                    format!("output exists: {}", existing.display()),
                );
            }
        }

        let source = match self
            .collaborators
            .opener
            .open(&task.source.path, task.source.page)
        {
            Ok(source) => source,
            Err(err) => {
                warn!(path = %task_ref.path, "cannot open input: {err:#}");
                return ProcessingResult::skipped(
                    task_ref,
                    Some(TaskFailure::new(FailureKind::Source, format!("{err:#}"))),
                    "corrupt or unsupported input",
                );
            }
        };
        let geometry = source.geometry();
        if let Some(msg) = probe::pixel_limit_violation(&self.cfg, &geometry) {
            info!(path = %task_ref.path, "{msg}");
            return ProcessingResult::skipped(
                task_ref,
                Some(TaskFailure::new(FailureKind::Limits, msg)),
                "input over limits",
            );
        }

        let outcome = self.engine.run(source.as_ref(), &task.params, cancel);
        drop(source);
        if cancel.is_cancelled() {
            debug!("cancelled during encoding; nothing persisted");
            return ProcessingResult::failed(task_ref, &TaskError::Cancelled, elapsed_ms(started));
        }

        let mut result = ProcessingResult {
            status: outcome.status,
            task: task_ref,
            final_attempt: outcome.final_attempt().cloned(),
            attempt_count: outcome.attempts.len() as u32,
            outputs: Vec::new(),
            detail: outcome.detail.clone(),
            error: outcome.error.as_ref().map(TaskFailure::from),
            elapsed_ms: 0,
        };

        if let Some(encoded) = &outcome.output {
            match output::persist(&task.out_dir, &task.output_stem, encoded) {
                Ok(persisted) => {
                    let writer = &self.collaborators.metadata;
                    if writer.available() {
                        let metadata = self.metadata_for(task, &geometry, &outcome);
                        if let Err(err) = writer.write(&persisted.primary, &metadata) {
                            warn!("converted successfully but metadata failed: {err:#}");
                            result.status = ResultStatus::Warning;
                            result.detail = Some("converted successfully but metadata failed".into());
                            result.error =
                                Some(TaskFailure::new(FailureKind::Metadata, format!("{err:#}")));
                        }
                    }
                    // Timed out or interrupted while writing.
                    if cancel.is_cancelled() {
                        output::discard(&persisted);
                        if let Err(err) = writer.remove(&persisted.primary) {
                            warn!("discard metadata: {err:#}");
                        }
                        return ProcessingResult::failed(
                            result.task,
                            &TaskError::Cancelled,
                            elapsed_ms(started),
                        );
                    }
                    result.outputs = persisted.files;
                }
                Err(err) => {
                    let err = TaskError::Output(err);
                    warn!("{err}");
                    result.status = ResultStatus::Failure;
                    result.outputs.clear();
                    result.error = Some(TaskFailure::from(&err));
                }
            }
        }

        result.elapsed_ms = elapsed_ms(started);
        match result.status {
            ResultStatus::Failure => warn!(
                elapsed_ms = result.elapsed_ms,
                error = ?result.error,
                "task failed"
            ),
            status => info!(
                ?status,
                attempts = result.attempt_count,
                elapsed_ms = result.elapsed_ms,
                "task finished"
            ),
        }
        result
    }
}

/// Composes the pool, the shared runner and the progress tracker. The two
/// execution modes differ only in pool bounds.
pub struct Orchestrator {
    cfg: Config,
    collaborators: Collaborators,
    sampler: Arc<ResourceSampler>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        cfg: Config,
        collaborators: Collaborators,
        probe: Box<dyn ResourceProbe>,
        cancel: CancellationToken,
    ) -> Self {
        let sampler = Arc::new(ResourceSampler::new(
            probe,
            SamplerSettings {
                memory_threshold: cfg.workers.memory_threshold,
                history_len: cfg.workers.history_len,
                lock_timeout: Duration::from_millis(50),
            },
        ));
        Self {
            cfg,
            collaborators,
            sampler,
            cancel,
        }
    }

    pub fn sampler(&self) -> &Arc<ResourceSampler> {
        &self.sampler
    }

    pub fn pool_settings(&self) -> PoolSettings {
        let settings = PoolSettings::from_config(&self.cfg);
        match self.cfg.global.mode {
            ExecutionMode::Sequential => settings.sequential(),
            ExecutionMode::Parallel => settings,
        }
    }

    /// Runs every task and returns one result per task, sorted by task id.
    pub async fn run(&self, tasks: Vec<Task>) -> BatchReport {
        let started = now_rfc3339();
        let total = tasks.len();
        let settings = self.pool_settings();
        info!(
            tasks = total,
            mode = ?self.cfg.global.mode,
            max_workers = settings.max_workers,
            "batch started"
        );

        let (tracker, mut rx) =
            ProgressTracker::with_channel(total, self.cfg.progress.channel_capacity);
        let tracker = Arc::new(tracker);
        let consumer = tokio::spawn(async move {
            while let Some(s) = rx.recv().await {
                info!(
                    completed = s.completed,
                    total = s.total,
                    percent = s.percent_complete,
                    eta_secs = s.eta_secs.round(),
                    "progress"
                );
            }
        });

        let sampler = self.sampler.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || sampler.sample()).await {
            warn!("baseline resource sample failed: {err}");
        }

        let runner: Arc<dyn TaskRunner> = Arc::new(TranscodeRunner::new(
            self.cfg.clone(),
            self.collaborators.clone(),
        ));
        let mut pool = AdaptiveWorkerPool::start(
            settings,
            self.sampler.clone(),
            runner,
            Some(tracker.clone()),
            self.cancel.clone(),
        );

        for task in tasks {
            let id = task.id;
            if let Err(err) = pool.submit(task).await {
                debug!(task = id, "not queued: {err}");
            }
        }

        let mut results = pool.drain_and_shutdown().await;
        let stats = pool.stats();
        let worker_samples = pool.worker_history();
        tracker.close();
        if let Err(err) = consumer.await {
            warn!("progress consumer ended abnormally: {err}");
        }

        results.sort_by_key(|r| r.task.id);
        let counts = StatusCounts::tally(&results);
        let cancelled = self.cancel.is_cancelled();
        info!(
            success = counts.success,
            warning = counts.warning,
            failure = counts.failure,
            skipped = counts.skipped,
            cancelled,
            "batch finished"
        );

        BatchReport {
            job_name: self.cfg.global.job_name.clone(),
            mode: self.cfg.global.mode,
            compression: self.cfg.compression.mode,
            document_type: self.cfg.compression.document_type,
            started,
            finished: now_rfc3339(),
            cancelled,
            capabilities: self.collaborators.capabilities(),
            pool: stats,
            worker_samples,
            counts,
            results,
        }
    }
}
