use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::taxonomy::Taxonomy;

mod batch;
mod env;
mod service;

pub use batch::{
    BatchConfig, DEFAULT_BATCH_FILENAME, DEFAULT_CHUNKS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_RETRIES, DEFAULT_RETRY_DELAY_MS,
};
pub use service::{BackendKind, DEFAULT_API_BASE, DEFAULT_MODEL, ServiceConfig};

const ENV_TAXONOMY: &str = "CTDLABEL_TAXONOMY";

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub batch: BatchConfig,
    pub taxonomy_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env::process_env)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            service: ServiceConfig::from_lookup(lookup)?,
            batch: BatchConfig::from_lookup(lookup)?,
            taxonomy_path: env::read_non_empty_env(lookup, ENV_TAXONOMY).map(PathBuf::from),
        })
    }

    /// Built-in label sets, replaced per category by the configured TOML file.
    pub fn load_taxonomy(&self) -> Result<Taxonomy> {
        match &self.taxonomy_path {
            Some(path) => Taxonomy::load(path),
            None => Ok(Taxonomy::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<HashMap<_, _>>();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_batch_service_conventions() {
        let config = AppConfig::from_lookup(&lookup_from(&[])).expect("config");
        assert_eq!(config.batch.chunks, 5);
        assert_eq!(config.batch.retries, 3);
        assert_eq!(config.batch.retry_delay, Duration::from_secs(2));
        assert_eq!(config.batch.poll_interval, Duration::from_secs(60));
        assert_eq!(config.batch.max_wait, Duration::from_secs(86_400));
        assert_eq!(config.batch.batch_filename, "b_output");
        assert!(config.batch.resume);
        assert!(!config.batch.parallel_categories);
        assert_eq!(config.service.backend, BackendKind::OpenAi);
        assert_eq!(config.service.model, "gpt-4o-mini");
        assert_eq!(config.service.api_base, DEFAULT_API_BASE);
        assert!(config.taxonomy_path.is_none());
    }

    #[test]
    fn env_overrides_are_applied_and_bounded() {
        let config = AppConfig::from_lookup(&lookup_from(&[
            ("CTDLABEL_CHUNKS", "0"),
            ("CTDLABEL_RETRIES", "5"),
            ("CTDLABEL_BACKEND", "llama"),
            ("CTDLABEL_API_BASE", "http://127.0.0.1:8080/v1/"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CTDLABEL_COMPLETION_WINDOW", "2h"),
            ("CTDLABEL_RUN_DEADLINE_SECS", "600"),
            ("CTDLABEL_RESUME", "off"),
            ("CTDLABEL_STRICT_LABELS", "yes"),
        ]))
        .expect("config");
        assert_eq!(config.batch.chunks, 5, "zero chunks falls back to default");
        assert_eq!(config.batch.retries, 5);
        assert_eq!(config.batch.max_wait, Duration::from_secs(7_200));
        assert_eq!(config.batch.run_deadline, Some(Duration::from_secs(600)));
        assert!(!config.batch.resume);
        assert!(config.batch.strict_labels);
        assert_eq!(config.service.backend, BackendKind::Inline);
        assert_eq!(config.service.api_base, "http://127.0.0.1:8080/v1");
        assert_eq!(config.service.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn invalid_backend_and_window_are_rejected() {
        let err = AppConfig::from_lookup(&lookup_from(&[("CTDLABEL_BACKEND", "carrier-pigeon")]))
            .expect_err("backend");
        assert!(err.to_string().contains("carrier-pigeon"));

        let err = AppConfig::from_lookup(&lookup_from(&[("CTDLABEL_COMPLETION_WINDOW", "soon")]))
            .expect_err("window");
        assert!(err.to_string().contains("completion window"));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AppConfig::from_lookup(&lookup_from(&[("CTDLABEL_API_KEY", "sk-secret")]))
            .expect("config");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
