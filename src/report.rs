use crate::{
    codec::{Capabilities, QualityMetrics, Strategy},
    config::{CompressionMode, DocumentType, ExecutionMode},
    error::{TaskError, TaskFailure},
    pool::{PoolStats, WorkerSample},
    task::TaskRef,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Warning,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptDecision {
    Accept,
    Retry,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionAttempt {
    pub strategy: Strategy,
    pub achieved_ratio: f64,
    pub quality_metrics: Option<QualityMetrics>,
    pub decision: AttemptDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Terminal record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: ResultStatus,
    pub task: TaskRef,
    pub final_attempt: Option<CompressionAttempt>,
    pub attempt_count: u32,
    pub outputs: Vec<OutputFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    pub elapsed_ms: u64,
}

impl ProcessingResult {
    pub fn failed(task: TaskRef, err: &TaskError, elapsed_ms: u64) -> Self {
        Self {
            status: ResultStatus::Failure,
            task,
            final_attempt: None,
            attempt_count: 0,
            outputs: Vec::new(),
            detail: None,
            error: Some(TaskFailure::from(err)),
            elapsed_ms,
        }
    }

    pub fn skipped(task: TaskRef, failure: Option<TaskFailure>, detail: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Skipped,
            task,
            final_attempt: None,
            attempt_count: 0,
            outputs: Vec::new(),
            detail: Some(detail.into()),
            error: failure,
            elapsed_ms: 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == crate::error::FailureKind::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub success: usize,
    pub warning: usize,
    pub failure: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn tally(results: &[ProcessingResult]) -> Self {
        let mut c = Self::default();
        for r in results {
            match r.status {
                ResultStatus::Success => c.success += 1,
                ResultStatus::Warning => c.warning += 1,
                ResultStatus::Failure => c.failure += 1,
                ResultStatus::Skipped => c.skipped += 1,
            }
            if r.is_cancelled() {
                c.cancelled += 1;
            }
        }
        c
    }

    pub fn total(&self) -> usize {
        self.success + self.warning + self.failure + self.skipped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub job_name: String,
    pub mode: ExecutionMode,
    pub compression: CompressionMode,
    pub document_type: DocumentType,
    pub started: String,
    pub finished: String,
    pub cancelled: bool,
    pub capabilities: Capabilities,
    pub pool: PoolStats,
    /// Worker count over time: the start reading, then one per scaling check.
    pub worker_samples: Vec<WorkerSample>,
    pub counts: StatusCounts,
    pub results: Vec<ProcessingResult>,
}
