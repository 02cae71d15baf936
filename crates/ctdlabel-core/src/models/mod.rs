mod identity;
mod job;
mod label;
mod report;

pub use identity::{ExpressionKey, normalize_expression};
pub use job::{ArtifactId, CompletionWindow, JobId, JobStatus, RemoteJob};
pub use label::{
    BatchRequestLine, ChatMessage, ChatRequestBody, LabelResult, LabelTask, ParseFailureKind,
    ResponseFormat,
};
pub use report::{ChunkOutcome, ChunkReport, RunReport, RunSource};
