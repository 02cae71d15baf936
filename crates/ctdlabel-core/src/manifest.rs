use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LabelError, Result};
use crate::taxonomy::Category;
use crate::workspace::RunWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestState {
    Submitted,
    Succeeded,
    Resumed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub chunk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub items: usize,
    pub request_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub state: ManifestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `jobs.json`: the per-chunk job ledger of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunks: Vec<ManifestEntry>,
}

impl JobManifest {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            updated_at: now,
            chunks: Vec::new(),
        }
    }

    /// Replaces the entry of the same chunk, or appends a new one.
    pub fn record(&mut self, mut entry: ManifestEntry) {
        let now = Utc::now();
        entry.updated_at = now;
        self.updated_at = now;
        match self.chunks.iter_mut().find(|item| item.chunk == entry.chunk) {
            Some(existing) => *existing = entry,
            None => self.chunks.push(entry),
        }
    }

    #[must_use]
    pub fn entry(&self, chunk: &str) -> Option<&ManifestEntry> {
        self.chunks.iter().find(|item| item.chunk == chunk)
    }

    pub fn save(&self, workspace: &RunWorkspace) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        workspace.write_atomic(&workspace.manifest_path(), &raw)
    }

    pub fn load(workspace: &RunWorkspace) -> Result<Option<Self>> {
        workspace
            .read_optional(&workspace.manifest_path())?
            .map(|raw| serde_json::from_str::<Self>(&raw).map_err(LabelError::from))
            .transpose()
    }
}

impl Default for JobManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestEntry {
    pub fn new(chunk: impl Into<String>, category: Option<Category>, items: usize, request_digest: impl Into<String>) -> Self {
        Self {
            chunk: chunk.into(),
            category,
            items,
            request_digest: request_digest.into(),
            job_id: None,
            state: ManifestState::Submitted,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn record_replaces_entry_of_same_chunk_and_persists() {
        let temp = tempdir().expect("tempdir");
        let workspace = RunWorkspace::new(temp.path(), "b_output");

        let mut manifest = JobManifest::new();
        let mut entry = ManifestEntry::new("gender_chunk_1", Some(Category::Gender), 3, "abc");
        entry.job_id = Some("batch_1".to_string());
        manifest.record(entry.clone());
        entry.state = ManifestState::Succeeded;
        manifest.record(entry);
        manifest.record(ManifestEntry::new("correction_chunk_1", None, 1, "def"));
        manifest.save(&workspace).expect("save");

        let loaded = JobManifest::load(&workspace).expect("load").expect("present");
        assert_eq!(loaded.chunks.len(), 2);
        assert_eq!(
            loaded.entry("gender_chunk_1").map(|entry| entry.state),
            Some(ManifestState::Succeeded)
        );
        assert!(loaded.entry("correction_chunk_1").and_then(|e| e.category).is_none());

        let raw = std::fs::read_to_string(workspace.manifest_path()).expect("raw");
        assert!(raw.contains("\"state\": \"succeeded\""));
    }
}
