//! In-memory batch service driven by a responder closure.
//!
//! Deterministic stand-in for the remote service: jobs complete after a
//! configurable number of polls, errors can be injected per operation, and
//! every call is counted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::json;

use super::{BatchService, error_envelope, success_envelope};
use crate::encoder::correlation_id;
use crate::error::{LabelError, Result};
use crate::models::{ArtifactId, BatchRequestLine, CompletionWindow, JobId, JobStatus, RemoteJob};
use crate::taxonomy::Category;

type Responder = Box<dyn Fn(&BatchRequestLine) -> Option<ScriptedReply> + Send + Sync>;

/// What the fake model returns for one request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Assistant message content (normally a JSON object string).
    Content(String),
    /// A per-request error envelope without a response body.
    Error(String),
}

pub struct ScriptedService {
    responder: Responder,
    state: Mutex<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    artifacts: HashMap<String, String>,
    jobs: HashMap<String, ScriptedJob>,
    calls: HashMap<String, usize>,
    failures: HashMap<String, u32>,
    polls_before_completion: u32,
    terminal_statuses: VecDeque<JobStatus>,
    raw_outputs: VecDeque<String>,
    withheld_outputs: u32,
    submitted: Vec<Vec<BatchRequestLine>>,
    cancelled: Vec<String>,
    next_id: u64,
}

struct ScriptedJob {
    input: String,
    polls_remaining: u32,
    terminal: JobStatus,
    has_output: bool,
}

impl ScriptedService {
    pub fn new(
        responder: impl Fn(&BatchRequestLine) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self::with_replies(move |line| responder(line).map(ScriptedReply::Content))
    }

    pub fn with_replies(
        responder: impl Fn(&BatchRequestLine) -> Option<ScriptedReply> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            state: Mutex::new(ScriptedState::default()),
        }
    }

    /// Answers with a well-formed triple for every listed pair whose label is `Some`;
    /// pairs with `None` and unknown requests are omitted from the output.
    #[must_use]
    pub fn labeling(entries: &[(Category, &str, Option<&str>)]) -> Self {
        let replies = entries
            .iter()
            .filter_map(|(category, expression, label)| {
                let label = (*label)?;
                let content = json!({
                    "cat_title": category.as_str(),
                    "cat_exp": expression,
                    "piv_cat": label,
                })
                .to_string();
                Some((correlation_id(*category, expression), content))
            })
            .collect::<HashMap<_, _>>();
        Self::new(move |line| replies.get(&line.custom_id).cloned())
    }

    /// Status polls that report `running` before a job reaches its terminal state.
    pub fn set_polls_before_completion(&self, polls: u32) {
        self.lock().polls_before_completion = polls;
    }

    /// Terminal status for the next submitted job (default: completed).
    pub fn push_terminal_status(&self, status: JobStatus) {
        self.lock().terminal_statuses.push_back(status);
    }

    /// Replaces the next fetched output artifact verbatim.
    pub fn push_raw_output(&self, raw: impl Into<String>) {
        self.lock().raw_outputs.push_back(raw.into());
    }

    /// The next submitted job completes without an output artifact.
    pub fn withhold_next_output(&self) {
        self.lock().withheld_outputs += 1;
    }

    /// Makes the next `count` calls of `operation` fail.
    pub fn fail_next(&self, operation: &str, count: u32) {
        self.lock().failures.insert(operation.to_string(), count);
    }

    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Request lines of every submitted job, in submission order.
    #[must_use]
    pub fn submitted(&self) -> Vec<Vec<BatchRequestLine>> {
        self.lock().submitted.clone()
    }

    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, ScriptedState>> {
        let mut state = self.lock();
        *state.calls.entry(operation.to_string()).or_default() += 1;
        if let Some(remaining) = state.failures.get_mut(operation)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(LabelError::Service(format!(
                "injected {operation} failure"
            )));
        }
        Ok(state)
    }

    fn render_output(&self, input: &str) -> Result<String> {
        let mut out = String::new();
        for (index, raw) in input.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            let line = serde_json::from_str::<BatchRequestLine>(raw)?;
            let request_id = format!("req_{index}");
            let envelope = match (self.responder)(&line) {
                Some(ScriptedReply::Content(content)) => success_envelope(
                    &request_id,
                    &line.custom_id,
                    json!({
                        "object": "chat.completion",
                        "model": line.body.model,
                        "choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": content},
                            "finish_reason": "stop"
                        }]
                    }),
                ),
                Some(ScriptedReply::Error(message)) => {
                    error_envelope(&request_id, &line.custom_id, &message)
                }
                None => continue,
            };
            out.push_str(&envelope.to_string());
            out.push('\n');
        }
        Ok(out)
    }
}

impl BatchService for ScriptedService {
    fn upload(&self, _file_name: &str, content: &[u8]) -> Result<ArtifactId> {
        let mut state = self.enter("upload")?;
        state.next_id += 1;
        let id = format!("file-{}", state.next_id);
        let text = String::from_utf8(content.to_vec())
            .map_err(|err| LabelError::Validation(format!("artifact is not utf-8: {err}")))?;
        state.artifacts.insert(id.clone(), text);
        Ok(ArtifactId(id))
    }

    fn submit(&self, input: &ArtifactId, _window: &CompletionWindow) -> Result<JobId> {
        let mut state = self.enter("submit")?;
        let content = state
            .artifacts
            .get(&input.0)
            .cloned()
            .ok_or_else(|| LabelError::NotFound(format!("artifact {input}")))?;
        let lines = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<BatchRequestLine>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        state.submitted.push(lines);
        state.next_id += 1;
        let id = format!("batch-{}", state.next_id);
        let terminal = state
            .terminal_statuses
            .pop_front()
            .unwrap_or(JobStatus::Completed);
        let polls_remaining = state.polls_before_completion;
        let has_output = state.withheld_outputs == 0;
        state.withheld_outputs = state.withheld_outputs.saturating_sub(1);
        state.jobs.insert(
            id.clone(),
            ScriptedJob {
                input: content,
                polls_remaining,
                terminal,
                has_output,
            },
        );
        Ok(JobId(id))
    }

    fn status(&self, job: &JobId) -> Result<RemoteJob> {
        let mut state = self.enter("status")?;
        let entry = state
            .jobs
            .get_mut(&job.0)
            .ok_or_else(|| LabelError::NotFound(format!("job {job}")))?;
        let has_output = entry.has_output;
        let status = if entry.polls_remaining > 0 {
            entry.polls_remaining -= 1;
            JobStatus::Running
        } else {
            entry.terminal
        };
        Ok(RemoteJob {
            id: job.clone(),
            status,
            service_status: match status {
                JobStatus::Pending => "validating",
                JobStatus::Running => "in_progress",
                JobStatus::Completed => "completed",
                JobStatus::Failed => "failed",
            }
            .to_string(),
            output_artifact: (status == JobStatus::Completed && has_output)
                .then(|| ArtifactId(format!("{}-output", job.0))),
        })
    }

    fn fetch_output(&self, job: &JobId) -> Result<String> {
        let input = {
            let mut state = self.enter("fetch_output")?;
            if let Some(raw) = state.raw_outputs.pop_front() {
                return Ok(raw);
            }
            let entry = state
                .jobs
                .get(&job.0)
                .ok_or_else(|| LabelError::NotFound(format!("job {job}")))?;
            if !entry.has_output {
                return Err(LabelError::JobFailed {
                    job_id: job.0.clone(),
                    status: "completed without output file".to_string(),
                });
            }
            entry.input.clone()
        };
        self.render_output(&input)
    }

    fn cancel(&self, job: &JobId) -> Result<()> {
        let mut state = self.enter("cancel")?;
        if !state.jobs.contains_key(&job.0) {
            return Err(LabelError::NotFound(format!("job {job}")));
        }
        state.cancelled.push(job.0.clone());
        Ok(())
    }
}
