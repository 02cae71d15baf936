use std::time::Duration;

use serde::Serialize;

use super::env::{
    EnvLookup, parse_enabled_default_true, parse_env_bool, read_env_u32, read_env_u64,
    read_env_usize, read_non_empty_env,
};
use crate::error::{LabelError, Result};
use crate::models::CompletionWindow;

const ENV_CHUNKS: &str = "CTDLABEL_CHUNKS";
const ENV_POLL_INTERVAL_SECS: &str = "CTDLABEL_POLL_INTERVAL_SECS";
const ENV_MAX_WAIT_SECS: &str = "CTDLABEL_MAX_WAIT_SECS";
const ENV_RUN_DEADLINE_SECS: &str = "CTDLABEL_RUN_DEADLINE_SECS";
const ENV_RETRIES: &str = "CTDLABEL_RETRIES";
const ENV_RETRY_DELAY_MS: &str = "CTDLABEL_RETRY_DELAY_MS";
const ENV_COMPLETION_WINDOW: &str = "CTDLABEL_COMPLETION_WINDOW";
const ENV_BATCH_FILENAME: &str = "CTDLABEL_BATCH_FILENAME";
const ENV_PARALLEL_CATEGORIES: &str = "CTDLABEL_PARALLEL_CATEGORIES";
const ENV_STRICT_LABELS: &str = "CTDLABEL_STRICT_LABELS";
const ENV_RESUME: &str = "CTDLABEL_RESUME";

pub const DEFAULT_CHUNKS: usize = 5;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
pub const DEFAULT_BATCH_FILENAME: &str = "b_output";

#[derive(Debug, Clone, Serialize)]
pub struct BatchConfig {
    pub chunks: usize,
    pub poll_interval: Duration,
    /// Per-job wait budget; defaults to the completion window.
    pub max_wait: Duration,
    /// Overall budget for one run, shared by every job it polls.
    pub run_deadline: Option<Duration>,
    pub retries: u32,
    pub retry_delay: Duration,
    pub completion_window: CompletionWindow,
    pub batch_filename: String,
    pub parallel_categories: bool,
    pub strict_labels: bool,
    pub resume: bool,
}

impl BatchConfig {
    pub(super) fn from_lookup(lookup: EnvLookup<'_>) -> Result<Self> {
        let completion_window = read_non_empty_env(lookup, ENV_COMPLETION_WINDOW)
            .map(CompletionWindow)
            .unwrap_or_default();
        let window_secs = completion_window.as_secs().ok_or_else(|| {
            LabelError::Validation(format!(
                "invalid completion window: {}",
                completion_window.0
            ))
        })?;
        let config = Self {
            chunks: read_env_usize(lookup, ENV_CHUNKS, DEFAULT_CHUNKS, 1),
            poll_interval: Duration::from_secs(
                read_env_u64(lookup, ENV_POLL_INTERVAL_SECS)
                    .filter(|value| *value >= 1)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            max_wait: Duration::from_secs(
                read_env_u64(lookup, ENV_MAX_WAIT_SECS)
                    .filter(|value| *value >= 1)
                    .unwrap_or(window_secs),
            ),
            run_deadline: read_env_u64(lookup, ENV_RUN_DEADLINE_SECS)
                .filter(|value| *value >= 1)
                .map(Duration::from_secs),
            retries: read_env_u32(lookup, ENV_RETRIES, DEFAULT_RETRIES, 1),
            retry_delay: Duration::from_millis(
                read_env_u64(lookup, ENV_RETRY_DELAY_MS).unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            completion_window,
            batch_filename: read_non_empty_env(lookup, ENV_BATCH_FILENAME)
                .unwrap_or_else(|| DEFAULT_BATCH_FILENAME.to_string()),
            parallel_categories: parse_env_bool(lookup(ENV_PARALLEL_CATEGORIES).as_deref()),
            strict_labels: parse_env_bool(lookup(ENV_STRICT_LABELS).as_deref()),
            resume: parse_enabled_default_true(lookup(ENV_RESUME).as_deref()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunks == 0 {
            return Err(LabelError::Validation("chunk count must be >= 1".to_string()));
        }
        if self.retries == 0 {
            return Err(LabelError::Validation("retries must be >= 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(LabelError::Validation(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.batch_filename.contains(['/', '\\']) {
            return Err(LabelError::Validation(format!(
                "batch filename must be a bare name: {}",
                self.batch_filename
            )));
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        let completion_window = CompletionWindow::default();
        let window_secs = completion_window.as_secs().unwrap_or(86_400);
        Self {
            chunks: DEFAULT_CHUNKS,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_wait: Duration::from_secs(window_secs),
            run_deadline: None,
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            completion_window,
            batch_filename: DEFAULT_BATCH_FILENAME.to_string(),
            parallel_categories: false,
            strict_labels: false,
            resume: true,
        }
    }
}
