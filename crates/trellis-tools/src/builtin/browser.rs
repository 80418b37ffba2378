//! Browser automation over the W3C WebDriver protocol.
//!
//! `WebDriverBackend` creates and deletes one WebDriver session per workflow
//! execution. The browser tools drive that session; they find it through the
//! `ToolContext` handed down by the invoker, never through global state.

use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, info};

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{SessionBackend, Tool};
use trellis_core::types::{ExecutionId, SessionHandle, ToolContext, ToolResult};

const PAGE_TEXT_SCRIPT: &str = "return document.body ? document.body.innerText : '';";
const DEFAULT_MAX_TEXT: usize = 20_000;

/// Thin WebDriver HTTP client.
#[derive(Clone)]
struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
}

/// Every WebDriver response wraps its payload in `value`.
#[derive(Deserialize)]
struct WdResponse<T> {
    value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

impl WebDriverClient {
    fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn with_endpoint(&self, endpoint: Option<&str>) -> Self {
        match endpoint {
            Some(url) => Self {
                http: self.http.clone(),
                base_url: url.trim_end_matches('/').to_string(),
            },
            None => self.clone(),
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(|e| format!("request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, text));
        }
        resp.json::<WdResponse<T>>()
            .await
            .map(|r| r.value)
            .map_err(|e| format!("invalid response: {}", e))
    }
}

/// Session backend that owns one WebDriver session per execution.
pub struct WebDriverBackend {
    client: WebDriverClient,
    capabilities: serde_json::Value,
}

impl WebDriverBackend {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            client: WebDriverClient::new(webdriver_url),
            capabilities: serde_json::json!({}),
        }
    }

    /// Set W3C capabilities sent as `alwaysMatch` (e.g. headless browser args).
    pub fn with_capabilities(mut self, capabilities: serde_json::Value) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl SessionBackend for WebDriverBackend {
    fn create<'a>(&'a self, execution_id: &'a ExecutionId) -> BoxFuture<'a, Result<SessionHandle>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "capabilities": { "alwaysMatch": self.capabilities }
            });
            let created: NewSession = self
                .client
                .call(reqwest::Method::POST, "/session", Some(body))
                .await
                .map_err(|e| TrellisError::Session(format!("create failed: {}", e)))?;

            info!(
                execution_id = %execution_id,
                session_id = %created.session_id,
                "WebDriver session created"
            );

            Ok(SessionHandle {
                session_id: created.session_id,
                execution_id: execution_id.clone(),
                endpoint: Some(self.client.base_url.clone()),
                created_at: Utc::now(),
            })
        })
    }

    fn destroy<'a>(&'a self, handle: &'a SessionHandle) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let client = self.client.with_endpoint(handle.endpoint.as_deref());
            client
                .call::<serde_json::Value>(
                    reqwest::Method::DELETE,
                    &format!("/session/{}", handle.session_id),
                    None,
                )
                .await
                .map_err(|e| TrellisError::Session(format!("delete failed: {}", e)))?;
            debug!(session_id = %handle.session_id, "WebDriver session deleted");
            Ok(())
        })
    }
}

/// Resolve the WebDriver client and session id a tool call should use.
fn session_for<'a>(
    client: &WebDriverClient,
    ctx: &'a ToolContext,
) -> std::result::Result<(WebDriverClient, &'a str), ToolResult> {
    match ctx.session.as_ref() {
        Some(handle) => Ok((
            client.with_endpoint(handle.endpoint.as_deref()),
            handle.session_id.as_str(),
        )),
        None => Err(ToolResult::error(format!(
            "No browser session is attached to execution {}",
            ctx.execution_id
        ))),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n[truncated]", &s[..idx]),
        None => s.to_string(),
    }
}

// ── browser_navigate ────────────────────────────────────────────

pub struct BrowserNavigateTool {
    client: WebDriverClient,
}

impl BrowserNavigateTool {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            client: WebDriverClient::new(webdriver_url),
        }
    }
}

#[derive(Deserialize)]
struct NavigateInput {
    url: String,
}

impl Tool for BrowserNavigateTool {
    fn name(&self) -> &str {
        "browser_navigate"
    }

    fn description(&self) -> &str {
        "Open a URL in the workflow's browser session."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute URL to open" }
            },
            "required": ["url"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        60
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: NavigateInput = serde_json::from_value(input)
                .map_err(|e| TrellisError::ToolValidation(e.to_string()))?;
            let (client, session_id) = match session_for(&self.client, &ctx) {
                Ok(s) => s,
                Err(result) => return Ok(result),
            };

            debug!(url = %params.url, session_id, "Navigating");
            client
                .call::<serde_json::Value>(
                    reqwest::Method::POST,
                    &format!("/session/{}/url", session_id),
                    Some(serde_json::json!({ "url": params.url })),
                )
                .await
                .map_err(|message| TrellisError::ToolExecution {
                    tool: "browser_navigate".to_string(),
                    message,
                })?;

            Ok(ToolResult::success(format!("Navigated to {}", params.url)))
        })
    }
}

// ── browser_page_text ───────────────────────────────────────────

pub struct BrowserPageTextTool {
    client: WebDriverClient,
}

impl BrowserPageTextTool {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            client: WebDriverClient::new(webdriver_url),
        }
    }
}

#[derive(Deserialize, Default)]
struct PageTextInput {
    #[serde(default)]
    max_length: Option<usize>,
}

impl Tool for BrowserPageTextTool {
    fn name(&self) -> &str {
        "browser_page_text"
    }

    fn description(&self) -> &str {
        "Return the visible text of the current page in the workflow's browser session."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "max_length": {
                    "type": "integer",
                    "description": "Maximum characters to return (default: 20000)"
                }
            }
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: PageTextInput = if input.is_null() {
                PageTextInput::default()
            } else {
                serde_json::from_value(input)
                    .map_err(|e| TrellisError::ToolValidation(e.to_string()))?
            };
            let (client, session_id) = match session_for(&self.client, &ctx) {
                Ok(s) => s,
                Err(result) => return Ok(result),
            };

            let text: String = client
                .call(
                    reqwest::Method::POST,
                    &format!("/session/{}/execute/sync", session_id),
                    Some(serde_json::json!({ "script": PAGE_TEXT_SCRIPT, "args": [] })),
                )
                .await
                .map_err(|message| TrellisError::ToolExecution {
                    tool: "browser_page_text".to_string(),
                    message,
                })?;

            let max = params.max_length.unwrap_or(DEFAULT_MAX_TEXT);
            Ok(ToolResult::success(truncate_chars(&text, max)))
        })
    }
}

// ── browser_current_url ─────────────────────────────────────────

pub struct BrowserCurrentUrlTool {
    client: WebDriverClient,
}

impl BrowserCurrentUrlTool {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            client: WebDriverClient::new(webdriver_url),
        }
    }
}

impl Tool for BrowserCurrentUrlTool {
    fn name(&self) -> &str {
        "browser_current_url"
    }

    fn description(&self) -> &str {
        "Return the URL currently loaded in the workflow's browser session."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let (client, session_id) = match session_for(&self.client, &ctx) {
                Ok(s) => s,
                Err(result) => return Ok(result),
            };

            let url: String = client
                .call(
                    reqwest::Method::GET,
                    &format!("/session/{}/url", session_id),
                    None,
                )
                .await
                .map_err(|message| TrellisError::ToolExecution {
                    tool: "browser_current_url".to_string(),
                    message,
                })?;

            Ok(ToolResult::success(url))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc\n[truncated]");
        // multi-byte characters are never split
        assert_eq!(truncate_chars("ééé", 2), "éé\n[truncated]");
    }

    #[test]
    fn test_new_session_response_shape() {
        let json = r#"{"value":{"sessionId":"abc123","capabilities":{"browserName":"chrome"}}}"#;
        let parsed: WdResponse<NewSession> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.value.session_id, "abc123");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = WebDriverClient::new("http://localhost:4444/");
        assert_eq!(client.base_url, "http://localhost:4444");
        let other = client.with_endpoint(Some("http://grid:4444/wd/hub/"));
        assert_eq!(other.base_url, "http://grid:4444/wd/hub");
    }

    #[tokio::test]
    async fn test_tool_without_session_reports_error() {
        let tool = BrowserCurrentUrlTool::new("http://127.0.0.1:4444");
        let ctx = ToolContext {
            execution_id: ExecutionId::from_string("exec-42"),
            session: None,
        };
        let result = tool.execute(serde_json::json!({}), ctx).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("exec-42"));
    }

    #[tokio::test]
    async fn test_navigate_validates_input() {
        let tool = BrowserNavigateTool::new("http://127.0.0.1:4444");
        let ctx = ToolContext {
            execution_id: ExecutionId::from_string("exec-1"),
            session: None,
        };
        let err = tool.execute(serde_json::json!({}), ctx).await.unwrap_err();
        assert!(matches!(err, TrellisError::ToolValidation(_)));
    }
}
