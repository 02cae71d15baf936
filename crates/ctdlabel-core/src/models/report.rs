use serde::{Deserialize, Serialize};

use super::identity::ExpressionKey;
use crate::taxonomy::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    Cache,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOutcome {
    Succeeded,
    /// Results were reused from an interrupted earlier run.
    Resumed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub name: String,
    /// `None` for the correction chunk, which may span categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub outcome: ChunkOutcome,
    pub records: usize,
    pub parse_failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkReport {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.outcome, ChunkOutcome::Succeeded | ChunkOutcome::Resumed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub source: RunSource,
    pub cache_path: String,
    pub rows: usize,
    pub labeled_rows: usize,
    #[serde(default)]
    pub chunks: Vec<ChunkReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<ChunkReport>,
    pub succeeded_chunks: usize,
    pub failed_chunks: usize,
    pub parse_failures: usize,
    pub out_of_set_labels: usize,
    pub unmatched_results: usize,
    #[serde(default)]
    pub unlabeled: Vec<ExpressionKey>,
}

impl RunReport {
    #[must_use]
    pub fn cached(cache_path: String, rows: usize, labeled_rows: usize) -> Self {
        Self {
            source: RunSource::Cache,
            cache_path,
            rows,
            labeled_rows,
            chunks: Vec::new(),
            correction: None,
            succeeded_chunks: 0,
            failed_chunks: 0,
            parse_failures: 0,
            out_of_set_labels: 0,
            unmatched_results: 0,
            unlabeled: Vec::new(),
        }
    }

    /// A run fails only when chunks were attempted and none of them succeeded.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        self.source == RunSource::Fresh
            && self.succeeded_chunks == 0
            && (self.failed_chunks > 0 || self.correction.is_some())
    }
}
