//! Capability set of an asynchronous batch-inference service.
//!
//! `RetryingService` decorates any implementation with the bounded retry policy;
//! the orchestrator only ever talks to the decorated form.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::{BackendKind, ServiceConfig};
use crate::error::Result;
use crate::models::{ArtifactId, CompletionWindow, JobId, RemoteJob};

mod http;
pub mod inline;
pub mod openai;
pub mod retry;
pub mod scripted;

pub use inline::InlineChatService;
pub use openai::OpenAiBatchService;
pub use retry::{RetryPolicy, RetryingService, retry_call};
pub use scripted::{ScriptedReply, ScriptedService};

pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

pub trait BatchService: Send + Sync {
    /// Uploads a request artifact and returns its service-side id.
    fn upload(&self, file_name: &str, content: &[u8]) -> Result<ArtifactId>;

    /// Registers a job over an uploaded artifact.
    fn submit(&self, input: &ArtifactId, window: &CompletionWindow) -> Result<JobId>;

    fn status(&self, job: &JobId) -> Result<RemoteJob>;

    /// Downloads the NDJSON output artifact of a completed job.
    fn fetch_output(&self, job: &JobId) -> Result<String>;

    /// Best-effort cancellation of an outstanding job.
    fn cancel(&self, job: &JobId) -> Result<()>;
}

impl<S: BatchService + ?Sized> BatchService for Box<S> {
    fn upload(&self, file_name: &str, content: &[u8]) -> Result<ArtifactId> {
        (**self).upload(file_name, content)
    }

    fn submit(&self, input: &ArtifactId, window: &CompletionWindow) -> Result<JobId> {
        (**self).submit(input, window)
    }

    fn status(&self, job: &JobId) -> Result<RemoteJob> {
        (**self).status(job)
    }

    fn fetch_output(&self, job: &JobId) -> Result<String> {
        (**self).fetch_output(job)
    }

    fn cancel(&self, job: &JobId) -> Result<()> {
        (**self).cancel(job)
    }
}

impl<S: BatchService + ?Sized> BatchService for Arc<S> {
    fn upload(&self, file_name: &str, content: &[u8]) -> Result<ArtifactId> {
        (**self).upload(file_name, content)
    }

    fn submit(&self, input: &ArtifactId, window: &CompletionWindow) -> Result<JobId> {
        (**self).submit(input, window)
    }

    fn status(&self, job: &JobId) -> Result<RemoteJob> {
        (**self).status(job)
    }

    fn fetch_output(&self, job: &JobId) -> Result<String> {
        (**self).fetch_output(job)
    }

    fn cancel(&self, job: &JobId) -> Result<()> {
        (**self).cancel(job)
    }
}

pub fn build_service(config: &ServiceConfig) -> Result<Box<dyn BatchService>> {
    Ok(match config.backend {
        BackendKind::OpenAi => Box::new(OpenAiBatchService::new(config)?),
        BackendKind::Inline => Box::new(InlineChatService::new(config)?),
    })
}

/// One line of a batch output artifact carrying a response body.
pub(crate) fn success_envelope(request_id: &str, custom_id: &str, body: Value) -> Value {
    json!({
        "id": request_id,
        "custom_id": custom_id,
        "response": {"status_code": 200, "request_id": request_id, "body": body},
        "error": null,
    })
}

/// One line of a batch output artifact for a request the service could not answer.
pub(crate) fn error_envelope(request_id: &str, custom_id: &str, message: &str) -> Value {
    json!({
        "id": request_id,
        "custom_id": custom_id,
        "response": null,
        "error": {"code": "request_failed", "message": message},
    })
}
