use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for a single task. None of these escape the task that
/// produced them; they are folded into its `ProcessingResult`.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid geometry: {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },

    #[error("queue saturated (capacity {capacity})")]
    QueueSaturated { capacity: usize },

    #[error("chunk {index} failed: {source:#}")]
    ChunkProcessing {
        index: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("worker crashed: {message}")]
    WorkerCrash { message: String },

    #[error("cancellation requested")]
    Cancelled,

    #[error("source error: {0:#}")]
    Source(#[source] anyhow::Error),

    #[error("encode error: {0:#}")]
    Encode(#[source] anyhow::Error),

    #[error("analyze error: {0:#}")]
    Analyze(#[source] anyhow::Error),

    #[error("output error: {0:#}")]
    Output(#[source] anyhow::Error),
}

impl TaskError {
    pub fn crash(message: impl Into<String>) -> Self {
        Self::WorkerCrash {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::InvalidGeometry { .. } => FailureKind::InvalidGeometry,
            TaskError::QueueSaturated { .. } => FailureKind::QueueSaturated,
            TaskError::ChunkProcessing { .. } => FailureKind::ChunkProcessing,
            TaskError::WorkerCrash { .. } => FailureKind::WorkerCrash,
            TaskError::Cancelled => FailureKind::Cancelled,
            TaskError::Source(_) => FailureKind::Source,
            TaskError::Encode(_) => FailureKind::Encode,
            TaskError::Analyze(_) => FailureKind::Analyze,
            TaskError::Output(_) => FailureKind::Output,
        }
    }
}

/// Serializable reason code carried in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidGeometry,
    QueueSaturated,
    ChunkProcessing,
    WorkerCrash,
    Cancelled,
    Source,
    Encode,
    Analyze,
    Output,
    Metadata,
    Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&TaskError> for TaskFailure {
    fn from(err: &TaskError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<TaskError> for TaskFailure {
    fn from(err: TaskError) -> Self {
        TaskFailure::from(&err)
    }
}
