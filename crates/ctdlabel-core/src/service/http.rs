use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::error::{LabelError, Result};

const ERROR_BODY_MAX_CHARS: usize = 240;

pub(super) fn build_client(config: &ServiceConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()
        .map_err(|err| LabelError::Internal(format!("http client build failed: {err}")))
}

pub(super) fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(super) fn authorized(builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}

/// Whether a retry of the same call can reasonably succeed.
pub(super) fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub(super) fn read_json(response: Response, context: &str) -> Result<Value> {
    let response = ensure_success(response, context)?;
    response
        .json::<Value>()
        .map_err(|err| LabelError::Service(format!("{context}: invalid json body: {err}")))
}

pub(super) fn read_text(response: Response, context: &str) -> Result<String> {
    let response = ensure_success(response, context)?;
    Ok(response.text()?)
}

fn ensure_success(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let kind = if is_transient(status) {
        "transient"
    } else {
        "fatal"
    };
    Err(LabelError::Service(format!(
        "{context} returned {status} ({kind}): {}",
        truncate_chars(body.trim(), ERROR_BODY_MAX_CHARS)
    )))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
