use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client: streaming chat completions.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Tool: callable by agents during an invocation.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls and agent tool lists).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Agent resolver: name to agent definition. Lookups are in-memory reads.
pub trait AgentResolver: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> Option<Arc<AgentDefinition>>;
}

/// Agent invoker: runs one agent against one prompt.
pub trait AgentInvoker: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        agent: &'a AgentDefinition,
        prompt: &'a str,
        ctx: &'a InvocationContext,
    ) -> BoxFuture<'a, Result<InvocationOutput>>;
}

/// Telemetry sink: append-only execution log. Must tolerate concurrent appends.
pub trait TelemetrySink: Send + Sync + 'static {
    fn append(&self, entry: ExecutionLogEntry) -> BoxFuture<'_, Result<()>>;
}

/// Session backend: creates and destroys the external resource behind a session.
pub trait SessionBackend: Send + Sync + 'static {
    fn create<'a>(&'a self, execution_id: &'a ExecutionId) -> BoxFuture<'a, Result<SessionHandle>>;

    fn destroy<'a>(&'a self, handle: &'a SessionHandle) -> BoxFuture<'a, Result<()>>;
}
