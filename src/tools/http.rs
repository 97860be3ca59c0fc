//! Shared HTTP plumbing for the built-in capabilities.

use std::time::Duration;

use reqwest::Client as HttpClient;
use serde_json::Value;

use super::args::ToolName;
use super::errors::ToolError;

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sent with every upstream request.
pub const USER_AGENT: &str = concat!("KrishiMitra/", env!("CARGO_PKG_VERSION"));

/// Build a client whose whole-request timeout is `timeout`.
pub fn build_client(tool: ToolName, timeout: Duration) -> Result<HttpClient, ToolError> {
    HttpClient::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ToolError::Upstream {
            tool: tool.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Send a GET and decode the JSON body, mapping every failure to `Upstream`.
pub async fn get_json(
    tool: ToolName,
    request: reqwest::RequestBuilder,
) -> Result<Value, ToolError> {
    let upstream = |reason: String| ToolError::Upstream {
        tool: tool.to_string(),
        reason,
    };

    let response = request
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                upstream("request timed out".to_string())
            } else {
                upstream(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(upstream(format!(
            "HTTP {}: {}",
            status.as_u16(),
            crate::agent_core::tokens::truncate_utf8(&body, 200)
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| upstream(format!("expected JSON body: {e}")))
}

/// Read a JSON value as `f64`, accepting numeric strings.
pub fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Round to two decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
