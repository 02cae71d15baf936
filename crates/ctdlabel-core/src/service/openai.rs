//! Files + Batches API backend.

use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use serde_json::{Value, json};

use super::http::{authorized, build_client, endpoint, read_json, read_text};
use super::{BatchService, CHAT_COMPLETIONS_ENDPOINT};
use crate::config::ServiceConfig;
use crate::error::{LabelError, Result, SubmissionStage};
use crate::models::{ArtifactId, CompletionWindow, JobId, JobStatus, RemoteJob};

const UPLOAD_PURPOSE: &str = "batch";
const ARTIFACT_MIME: &str = "application/jsonl";

pub struct OpenAiBatchService {
    client: Client,
    api_base: String,
    api_key: Option<String>,
}

impl OpenAiBatchService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.api_base, path)
    }

    fn key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn batch_object(&self, job: &JobId) -> Result<Value> {
        let response = authorized(self.client.get(self.url(&format!("batches/{job}"))), self.key())
            .send()?;
        read_json(response, "batch status")
    }
}

/// Maps a service-side batch status onto the four-state job model.
#[must_use]
pub fn map_service_status(raw: &str) -> JobStatus {
    match raw {
        "validating" => JobStatus::Pending,
        "in_progress" | "finalizing" | "cancelling" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" | "expired" | "cancelled" => JobStatus::Failed,
        other => {
            tracing::warn!(status = other, "unrecognized batch status; treating as running");
            JobStatus::Running
        }
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|raw| !raw.is_empty())
        .map(ToString::to_string)
}

impl BatchService for OpenAiBatchService {
    fn upload(&self, file_name: &str, content: &[u8]) -> Result<ArtifactId> {
        let upload = || -> Result<ArtifactId> {
            let part = Part::bytes(content.to_vec())
                .file_name(file_name.to_string())
                .mime_str(ARTIFACT_MIME)?;
            let form = Form::new().text("purpose", UPLOAD_PURPOSE).part("file", part);
            let response = authorized(self.client.post(self.url("files")), self.key())
                .multipart(form)
                .send()?;
            let body = read_json(response, "file upload")?;
            string_field(&body, "id")
                .map(ArtifactId)
                .ok_or_else(|| LabelError::Service("file upload response has no id".to_string()))
        };
        upload().map_err(|err| LabelError::submission(SubmissionStage::Upload, err.to_string()))
    }

    fn submit(&self, input: &ArtifactId, window: &CompletionWindow) -> Result<JobId> {
        let register = || -> Result<JobId> {
            let response = authorized(self.client.post(self.url("batches")), self.key())
                .json(&json!({
                    "input_file_id": input.0,
                    "endpoint": CHAT_COMPLETIONS_ENDPOINT,
                    "completion_window": window.0,
                }))
                .send()?;
            let body = read_json(response, "batch create")?;
            string_field(&body, "id")
                .map(JobId)
                .ok_or_else(|| LabelError::Service("batch create response has no id".to_string()))
        };
        register()
            .map_err(|err| LabelError::submission(SubmissionStage::Register, err.to_string()))
    }

    fn status(&self, job: &JobId) -> Result<RemoteJob> {
        let body = self.batch_object(job)?;
        let service_status = string_field(&body, "status").unwrap_or_default();
        Ok(RemoteJob {
            id: job.clone(),
            status: map_service_status(&service_status),
            service_status,
            output_artifact: string_field(&body, "output_file_id").map(ArtifactId),
        })
    }

    fn fetch_output(&self, job: &JobId) -> Result<String> {
        let body = self.batch_object(job)?;
        let Some(output) = string_field(&body, "output_file_id") else {
            return Err(LabelError::JobFailed {
                job_id: job.0.clone(),
                status: string_field(&body, "status")
                    .map_or_else(|| "no output file".to_string(), |s| format!("{s} without output file")),
            });
        };
        let response = authorized(
            self.client.get(self.url(&format!("files/{output}/content"))),
            self.key(),
        )
        .send()?;
        read_text(response, "output download")
    }

    fn cancel(&self, job: &JobId) -> Result<()> {
        let response = authorized(
            self.client.post(self.url(&format!("batches/{job}/cancel"))),
            self.key(),
        )
        .send()?;
        read_json(response, "batch cancel").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;
    use crate::config::BackendKind;

    fn config(base: String) -> ServiceConfig {
        ServiceConfig {
            backend: BackendKind::OpenAi,
            api_base: base,
            api_key: Some("sk-test".to_string()),
            model: "gpt-4o-mini".to_string(),
            http_timeout_ms: 5_000,
        }
    }

    #[test]
    fn status_strings_map_onto_job_states() {
        assert_eq!(map_service_status("validating"), JobStatus::Pending);
        assert_eq!(map_service_status("finalizing"), JobStatus::Running);
        assert_eq!(map_service_status("cancelling"), JobStatus::Running);
        assert_eq!(map_service_status("completed"), JobStatus::Completed);
        assert_eq!(map_service_status("expired"), JobStatus::Failed);
        assert_eq!(map_service_status("reticulating"), JobStatus::Running);
    }

    #[test]
    fn upload_and_register_use_files_and_batches_endpoints() {
        let mut server = mockito::Server::new();
        let upload = server
            .mock("POST", "/files")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Regex("name=\"purpose\"".to_string()))
            .with_status(200)
            .with_body(r#"{"id":"file-abc","object":"file"}"#)
            .create();
        let register = server
            .mock("POST", "/batches")
            .match_body(Matcher::PartialJson(json!({
                "input_file_id": "file-abc",
                "endpoint": "/v1/chat/completions",
                "completion_window": "24h"
            })))
            .with_status(200)
            .with_body(r#"{"id":"batch_1","status":"validating"}"#)
            .create();

        let service = OpenAiBatchService::new(&config(server.url())).expect("service");
        let file = service
            .upload("gender_chunk_1.jsonl", b"{\"custom_id\":\"x\"}\n")
            .expect("upload");
        let job = service
            .submit(&file, &CompletionWindow::default())
            .expect("submit");

        assert_eq!(file, ArtifactId("file-abc".to_string()));
        assert_eq!(job, JobId("batch_1".to_string()));
        upload.assert();
        register.assert();
    }

    #[test]
    fn rejected_upload_is_reported_as_upload_stage_failure() {
        let mut server = mockito::Server::new();
        let _upload = server
            .mock("POST", "/files")
            .with_status(401)
            .with_body(r#"{"error":{"message":"bad key"}}"#)
            .create();

        let service = OpenAiBatchService::new(&config(server.url())).expect("service");
        let err = service.upload("a.jsonl", b"").expect_err("must fail");
        match err {
            LabelError::Submission { stage, message } => {
                assert_eq!(stage, SubmissionStage::Upload);
                assert!(message.contains("401"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn completed_batch_output_is_downloaded_from_output_file() {
        let mut server = mockito::Server::new();
        let _status = server
            .mock("GET", "/batches/batch_1")
            .with_status(200)
            .with_body(r#"{"id":"batch_1","status":"completed","output_file_id":"file-out"}"#)
            .expect(2)
            .create();
        let _content = server
            .mock("GET", "/files/file-out/content")
            .with_status(200)
            .with_body("{\"custom_id\":\"a\"}\n")
            .create();

        let service = OpenAiBatchService::new(&config(server.url())).expect("service");
        let job = JobId("batch_1".to_string());
        let remote = service.status(&job).expect("status");
        assert_eq!(remote.status, JobStatus::Completed);
        assert_eq!(remote.output_artifact, Some(ArtifactId("file-out".to_string())));
        assert_eq!(service.fetch_output(&job).expect("output"), "{\"custom_id\":\"a\"}\n");
    }

    #[test]
    fn completed_batch_without_output_file_is_a_job_failure() {
        let mut server = mockito::Server::new();
        let _status = server
            .mock("GET", "/batches/batch_2")
            .with_status(200)
            .with_body(r#"{"id":"batch_2","status":"completed","output_file_id":null}"#)
            .create();

        let service = OpenAiBatchService::new(&config(server.url())).expect("service");
        let err = service
            .fetch_output(&JobId("batch_2".to_string()))
            .expect_err("no output");
        assert_eq!(err.code(), "JOB_FAILED");
    }
}
