use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for one workflow execution.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A chat message sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool use blocks from this message.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    TextDelta(String),
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolInputDelta { index: usize, delta: String },
    Stop(StopReason),
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// An external session resource bound to one execution (e.g. a WebDriver browser session).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    /// Backend-assigned session id.
    pub session_id: String,
    pub execution_id: ExecutionId,
    /// Base URL the session is reachable at, if the backend is remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub execution_id: ExecutionId,
    pub session: Option<SessionHandle>,
}

/// A named agent: system prompt, model and tool set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "systemPrompt")]
    pub system_prompt: String,
    /// Overrides the configured model id for this agent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "toolNames")]
    pub tools: Vec<String>,
    #[serde(default, alias = "defaultTask")]
    pub default_task: Option<String>,
    /// JSON schema the agent's reply should conform to.
    #[serde(default, alias = "responseFormat")]
    pub response_format: Option<serde_json::Value>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            system_prompt: system_prompt.into(),
            model: None,
            tools: vec![],
            default_task: None,
            response_format: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_default_task(mut self, task: impl Into<String>) -> Self {
        self.default_task = Some(task.into());
        self
    }
}

/// Token usage for one agent invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// One tool call made during an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolTraceEntry {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: String,
    pub is_error: bool,
}

/// What an agent invocation produced.
#[derive(Debug, Clone, Default)]
pub struct InvocationOutput {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub tool_trace: Vec<ToolTraceEntry>,
}

impl InvocationOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Per-execution context handed down to the invoker and from there to tools.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub execution_id: ExecutionId,
    pub session: Option<SessionHandle>,
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            execution_id: self.execution_id.clone(),
            session: self.session.clone(),
        }
    }
}

/// Outcome of a single agent invocation attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Telemetry record appended once per agent invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub execution_id: ExecutionId,
    pub agent_name: String,
    pub status: LogStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn success(
        execution_id: &ExecutionId,
        agent_name: &str,
        latency_ms: u64,
        usage: Option<TokenUsage>,
    ) -> Self {
        Self {
            execution_id: execution_id.clone(),
            agent_name: agent_name.to_string(),
            status: LogStatus::Success,
            latency_ms,
            input_tokens: usage.map(|u| u.input_tokens),
            output_tokens: usage.map(|u| u.output_tokens),
            total_tokens: usage.map(|u| u.total_tokens),
            error_details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(
        execution_id: &ExecutionId,
        agent_name: &str,
        latency_ms: u64,
        details: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.clone(),
            agent_name: agent_name.to_string(),
            status: LogStatus::Error,
            latency_ms,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            error_details: Some(details.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Progress event streamed to the caller of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    NodeExecuting {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    NodeFinished {
        #[serde(rename = "nodeId")]
        node_id: String,
        content: String,
    },
    FinalResponse { content: String },
    Error { error: String },
}

impl ProgressEvent {
    /// Terminal events close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalResponse { .. } | Self::Error { .. })
    }

    /// Serialize as one line of newline-delimited JSON.
    pub fn to_ndjson_line(&self) -> String {
        // Serializing this enum cannot fail: every field is a plain string.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}
