use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LabelError>;

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("submission failed during {stage}: {message}")]
    Submission {
        stage: SubmissionStage,
        message: String,
    },

    #[error("job {job_id} failed with service status '{status}'")]
    JobFailed { job_id: String, status: String },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("job {job_id} still '{status}' after waiting {waited_secs}s")]
    PollTimeout {
        job_id: String,
        status: String,
        waited_secs: u64,
    },

    #[error("run deadline exhausted: {0}")]
    DeadlineExceeded(String),

    #[error("service request failed: {0}")]
    Service(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    Upload,
    Register,
}

impl std::fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Register => f.write_str("register"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub operation: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LabelError {
    pub fn submission(stage: SubmissionStage, message: impl Into<String>) -> Self {
        Self::Submission {
            stage,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Submission { .. } => "SUBMISSION_FAILED",
            Self::JobFailed { .. } => "JOB_FAILED",
            Self::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            Self::PollTimeout { .. } => "POLL_TIMEOUT",
            Self::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            Self::Service(_) => "SERVICE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Csv(_) => "CSV_ERROR",
            Self::Toml(_) => "TOML_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Chunk-scoped failures abort one chunk; everything else aborts the run.
    #[must_use]
    pub fn is_chunk_scoped(&self) -> bool {
        matches!(
            self,
            Self::Submission { .. }
                | Self::JobFailed { .. }
                | Self::MaxRetriesExceeded { .. }
                | Self::PollTimeout { .. }
                | Self::DeadlineExceeded(_)
                | Self::Service(_)
                | Self::Http(_)
        )
    }

    /// False for terminal job states and local rejections.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::JobFailed { .. }
                | Self::Validation(_)
                | Self::Conflict(_)
                | Self::DeadlineExceeded(_)
        )
    }

    pub fn to_payload(&self, operation: impl Into<String>) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            operation: operation.into(),
            trace_id: Uuid::new_v4().to_string(),
            details: None,
        }
    }
}
