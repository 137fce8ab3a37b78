//! Shared HTTP client helpers

use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

const USER_AGENT: &str = concat!("tempotune/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used by every external service
pub fn build_client() -> PipelineResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| PipelineError::Logic(format!("Failed to create HTTP client: {e}")))
}

/// Map a transport failure to a retryable upstream error
pub fn send_error(service: &'static str, err: reqwest::Error) -> PipelineError {
    PipelineError::upstream(service, err.status().map(|s| s.as_u16()), err.to_string())
}

/// Pass successful responses through, turn the rest into errors by status
pub async fn check_status(service: &'static str, response: Response) -> PipelineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!("{} responded {}, body unreadable: {}", service, status, e);
            String::new()
        }
    };
    debug!("{} responded {}: {}", service, status, body);

    let message = extract_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(PipelineError::from_status(service, status.as_u16(), message))
}

/// Pull `error.message` (or `error_description`) out of a JSON error body
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.get("error_description"))
        .or_else(|| value.get("error"))
        .and_then(|v| v.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
