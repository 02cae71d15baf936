use std::path::PathBuf;

use crate::error::Result;
use crate::jsonl::write_jsonl;
use crate::models::{ArtifactId, CompletionWindow, JobId, LabelTask};
use crate::service::BatchService;
use crate::workspace::RunWorkspace;

/// NDJSON request artifact for a chunk, one request line per task.
pub fn render_request_artifact(tasks: &[LabelTask]) -> Result<String> {
    write_jsonl(tasks.iter().map(|task| &task.request))
}

#[must_use]
pub fn request_digest(artifact: &str) -> String {
    blake3::hash(artifact.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub artifact: ArtifactId,
    pub job: JobId,
    pub request_path: PathBuf,
}

pub struct BatchSubmitter<'a> {
    service: &'a dyn BatchService,
    workspace: &'a RunWorkspace,
    window: &'a CompletionWindow,
}

impl<'a> BatchSubmitter<'a> {
    pub fn new(
        service: &'a dyn BatchService,
        workspace: &'a RunWorkspace,
        window: &'a CompletionWindow,
    ) -> Self {
        Self {
            service,
            workspace,
            window,
        }
    }

    /// Persists the request artifact, uploads it and registers a job over it.
    pub fn submit(&self, chunk_name: &str, artifact: &str) -> Result<SubmittedJob> {
        let request_path = self.workspace.request_path(chunk_name);
        self.workspace
            .write_atomic(&request_path, artifact.as_bytes())?;

        let file_name = format!("{chunk_name}.jsonl");
        let uploaded = self.service.upload(&file_name, artifact.as_bytes())?;
        let job = self.service.submit(&uploaded, self.window)?;
        tracing::info!(
            chunk = chunk_name,
            artifact_id = %uploaded,
            job_id = %job,
            requests = artifact.lines().count(),
            "chunk submitted"
        );
        Ok(SubmittedJob {
            artifact: uploaded,
            job,
            request_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::encoder::TaskEncoder;
    use crate::service::ScriptedService;
    use crate::taxonomy::{Category, Taxonomy};

    #[test]
    fn request_artifact_is_written_before_upload() {
        let temp = tempdir().expect("tempdir");
        let workspace = RunWorkspace::new(temp.path(), "b_output");
        workspace.initialize().expect("init");
        let taxonomy = Taxonomy::builtin();
        let tasks = TaskEncoder::new("gpt-4o-mini")
            .encode(
                Category::Gender,
                taxonomy.label_set(Category::Gender).expect("gender"),
                ["men", "women", "n/a"],
            )
            .expect("encode");
        let artifact = render_request_artifact(&tasks).expect("render");

        let service = ScriptedService::new(|_line| None);
        service.fail_next("submit", 1);
        let window = CompletionWindow::default();
        let submitter = BatchSubmitter::new(&service, &workspace, &window);

        assert!(submitter.submit("gender_chunk_1", &artifact).is_err());
        let on_disk = std::fs::read_to_string(workspace.request_path("gender_chunk_1")).expect("artifact");
        assert_eq!(request_digest(&on_disk), request_digest(&artifact));

        let submitted = submitter.submit("gender_chunk_1", &artifact).expect("submit");
        assert!(!submitted.job.0.is_empty());
        assert_eq!(service.submitted().len(), 1);
        assert_eq!(service.submitted()[0].len(), 3);
    }

    #[test]
    fn digest_changes_with_content() {
        assert_eq!(request_digest("a\n"), request_digest("a\n"));
        assert_ne!(request_digest("a\n"), request_digest("b\n"));
        assert_eq!(request_digest("").len(), 64);
    }
}
