use std::fmt;

use serde::Serialize;

use super::env::{EnvLookup, read_env_u64, read_non_empty_env};
use crate::error::{LabelError, Result};

const ENV_BACKEND: &str = "CTDLABEL_BACKEND";
const ENV_API_BASE: &str = "CTDLABEL_API_BASE";
const ENV_API_KEY: &str = "CTDLABEL_API_KEY";
const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_MODEL: &str = "CTDLABEL_MODEL";
const ENV_HTTP_TIMEOUT_MS: &str = "CTDLABEL_HTTP_TIMEOUT_MS";

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 60_000;
const MIN_HTTP_TIMEOUT_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Asynchronous files + batches API.
    OpenAi,
    /// One chat-completions call per request, executed at submit time.
    Inline,
}

impl BackendKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "batch" => Ok(Self::OpenAi),
            "inline" | "chat" | "llama" => Ok(Self::Inline),
            other => Err(LabelError::Validation(format!(
                "unsupported backend: {other}"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::Inline => f.write_str("inline"),
        }
    }
}

#[derive(Clone, Serialize)]
pub struct ServiceConfig {
    pub backend: BackendKind,
    pub api_base: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub model: String,
    pub http_timeout_ms: u64,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("backend", &self.backend)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("http_timeout_ms", &self.http_timeout_ms)
            .finish()
    }
}

impl ServiceConfig {
    pub(super) fn from_lookup(lookup: EnvLookup<'_>) -> Result<Self> {
        let backend = read_non_empty_env(lookup, ENV_BACKEND)
            .map(|raw| BackendKind::parse(&raw))
            .transpose()?
            .unwrap_or(BackendKind::OpenAi);
        Ok(Self {
            backend,
            api_base: read_non_empty_env(lookup, ENV_API_BASE)
                .map(|raw| raw.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: read_non_empty_env(lookup, ENV_API_KEY)
                .or_else(|| read_non_empty_env(lookup, ENV_OPENAI_API_KEY)),
            model: read_non_empty_env(lookup, ENV_MODEL)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http_timeout_ms: read_env_u64(lookup, ENV_HTTP_TIMEOUT_MS)
                .filter(|value| *value >= MIN_HTTP_TIMEOUT_MS)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::OpenAi,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
        }
    }
}
