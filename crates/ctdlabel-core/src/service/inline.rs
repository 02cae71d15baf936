//! Synchronous chat-completions backend.
//!
//! Presents the batch capability set over a plain `/chat/completions`
//! endpoint (llama.cpp server, vLLM, OpenAI itself): `submit` executes every
//! request line immediately and keeps the batch-shaped output in memory.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use reqwest::blocking::Client;

use super::http::{authorized, build_client, endpoint, read_json};
use super::{BatchService, error_envelope, success_envelope};
use crate::config::ServiceConfig;
use crate::error::{LabelError, Result};
use crate::jsonl::parse_jsonl_tolerant;
use crate::models::{ArtifactId, BatchRequestLine, CompletionWindow, JobId, JobStatus, RemoteJob};

pub struct InlineChatService {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    state: Mutex<InlineState>,
}

#[derive(Default)]
struct InlineState {
    artifacts: HashMap<String, String>,
    outputs: HashMap<String, String>,
    next_id: u64,
}

impl InlineChatService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            state: Mutex::new(InlineState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, InlineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, line: &BatchRequestLine) -> Result<serde_json::Value> {
        let response = authorized(
            self.client.post(endpoint(&self.api_base, "chat/completions")),
            self.api_key.as_deref(),
        )
        .json(&line.body)
        .send()?;
        read_json(response, "chat completion")
    }

    fn execute(&self, content: &str) -> String {
        let requests = parse_jsonl_tolerant::<BatchRequestLine>(content);
        if let Some((line, err)) = &requests.first_error {
            tracing::warn!(
                skipped = requests.skipped_lines,
                first_line = line,
                error = %err,
                "skipping malformed request lines"
            );
        }
        let mut out = String::new();
        for (index, line) in requests.items.iter().enumerate() {
            let request_id = format!("inline_req_{index}");
            let envelope = match self.complete(line) {
                Ok(body) => success_envelope(&request_id, &line.custom_id, body),
                Err(err) => {
                    tracing::warn!(
                        custom_id = %line.custom_id,
                        error = %err,
                        "inline completion failed"
                    );
                    error_envelope(&request_id, &line.custom_id, &err.to_string())
                }
            };
            out.push_str(&envelope.to_string());
            out.push('\n');
        }
        out
    }
}

impl BatchService for InlineChatService {
    fn upload(&self, _file_name: &str, content: &[u8]) -> Result<ArtifactId> {
        let text = String::from_utf8(content.to_vec())
            .map_err(|err| LabelError::Validation(format!("artifact is not utf-8: {err}")))?;
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("inline-file-{}", state.next_id);
        state.artifacts.insert(id.clone(), text);
        Ok(ArtifactId(id))
    }

    fn submit(&self, input: &ArtifactId, _window: &CompletionWindow) -> Result<JobId> {
        let content = self
            .lock()
            .artifacts
            .get(&input.0)
            .cloned()
            .ok_or_else(|| LabelError::NotFound(format!("artifact {input}")))?;
        let output = self.execute(&content);
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("inline-batch-{}", state.next_id);
        state.outputs.insert(id.clone(), output);
        Ok(JobId(id))
    }

    fn status(&self, job: &JobId) -> Result<RemoteJob> {
        if !self.lock().outputs.contains_key(&job.0) {
            return Err(LabelError::NotFound(format!("job {job}")));
        }
        Ok(RemoteJob {
            id: job.clone(),
            status: JobStatus::Completed,
            service_status: "completed".to_string(),
            output_artifact: Some(ArtifactId(format!("{job}-output"))),
        })
    }

    fn fetch_output(&self, job: &JobId) -> Result<String> {
        self.lock()
            .outputs
            .get(&job.0)
            .cloned()
            .ok_or_else(|| LabelError::NotFound(format!("job {job}")))
    }

    fn cancel(&self, job: &JobId) -> Result<()> {
        if self.lock().outputs.contains_key(&job.0) {
            Ok(())
        } else {
            Err(LabelError::NotFound(format!("job {job}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::{Value, json};

    use super::*;
    use crate::config::BackendKind;
    use crate::encoder::TaskEncoder;
    use crate::jsonl::write_jsonl;
    use crate::taxonomy::{Category, Taxonomy};

    fn config(base: String) -> ServiceConfig {
        ServiceConfig {
            backend: BackendKind::Inline,
            api_base: base,
            api_key: None,
            model: "llama-3".to_string(),
            http_timeout_ms: 5_000,
        }
    }

    fn artifact(expressions: &[&str]) -> String {
        let taxonomy = Taxonomy::builtin();
        let labels = taxonomy.label_set(Category::Age).expect("age");
        let tasks = TaskEncoder::new("llama-3")
            .encode(Category::Age, labels, expressions.iter().copied())
            .expect("encode");
        write_jsonl(tasks.iter().map(|task| &task.request)).expect("jsonl")
    }

    #[test]
    fn each_request_line_becomes_one_output_envelope() {
        let mut server = mockito::Server::new();
        let completion = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "llama-3", "temperature": 0.0})))
            .with_status(200)
            .with_body(
                json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"piv_cat\":\"adult\"}"}}]
                })
                .to_string(),
            )
            .expect(2)
            .create();

        let service = InlineChatService::new(&config(server.url())).expect("service");
        let file = service
            .upload("age_chunk_1.jsonl", artifact(&["18+", "adults"]).as_bytes())
            .expect("upload");
        let job = service
            .submit(&file, &CompletionWindow::default())
            .expect("submit");
        assert_eq!(service.status(&job).expect("status").status, JobStatus::Completed);

        let output = service.fetch_output(&job).expect("output");
        let lines = output
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).expect("envelope"))
            .collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line["response"]["status_code"] == 200));
        completion.assert();
    }

    #[test]
    fn failed_completion_becomes_error_envelope_not_job_failure() {
        let mut server = mockito::Server::new();
        let _completion = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("overloaded")
            .create();

        let service = InlineChatService::new(&config(server.url())).expect("service");
        let file = service
            .upload("age_chunk_1.jsonl", artifact(&["children"]).as_bytes())
            .expect("upload");
        let job = service
            .submit(&file, &CompletionWindow::default())
            .expect("submit");
        let output = service.fetch_output(&job).expect("output");
        let envelope = serde_json::from_str::<Value>(output.trim()).expect("envelope");
        assert!(envelope["response"].is_null());
        assert!(
            envelope["error"]["message"]
                .as_str()
                .is_some_and(|message| message.contains("500"))
        );
    }
}
