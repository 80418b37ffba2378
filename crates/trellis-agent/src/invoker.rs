//! LLM-backed agent invoker: a ReAct loop over a streaming chat client.
//!
//! Each turn streams one assistant message. Tool calls in that message run
//! through the tool registry with the execution's `ToolContext`, and their
//! results are fed back as the next user message. The loop ends on the first
//! turn without tool calls.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{debug, error, info};

use trellis_core::config::ModelConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{AgentInvoker, LlmClient};
use trellis_core::types::*;
use trellis_tools::ToolRegistry;

pub struct LlmInvoker {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    tools: Arc<ToolRegistry>,
    max_turns: usize,
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

impl LlmInvoker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: ModelConfig,
        tools: Arc<ToolRegistry>,
        max_turns: usize,
    ) -> Self {
        Self {
            llm,
            model,
            tools,
            max_turns: max_turns.max(1),
        }
    }

    fn model_for(&self, agent: &AgentDefinition) -> ModelConfig {
        let mut model = self.model.clone();
        if let Some(id) = agent.model.as_deref().filter(|m| !m.trim().is_empty()) {
            model.model_id = id.to_string();
        }
        model
    }

    async fn run(
        &self,
        agent: &AgentDefinition,
        prompt: &str,
        ctx: &InvocationContext,
    ) -> Result<InvocationOutput> {
        let model = self.model_for(agent);
        let tool_defs = self.tools.definitions_for(&agent.tools);
        let mut messages = vec![
            ChatMessage::system(system_prompt(agent)),
            ChatMessage::user(prompt),
        ];
        let mut usage: Option<TokenUsage> = None;
        let mut tool_trace = Vec::new();

        for turn in 0..self.max_turns {
            if ctx.cancel.is_cancelled() {
                return Err(TrellisError::Cancelled);
            }
            debug!(agent = %agent.name, turn, "Starting agent turn");

            let mut stream = tokio::select! {
                result = self.llm.chat_stream(&model, messages.clone(), &tool_defs) => result?,
                _ = ctx.cancel.cancelled() => return Err(TrellisError::Cancelled),
            };

            let mut text = String::new();
            let mut tool_calls: Vec<ToolCallAccumulator> = Vec::new();

            while let Some(delta) = stream.next().await {
                match delta? {
                    StreamDelta::TextDelta(t) => text.push_str(&t),
                    StreamDelta::ToolUseStart { index, id, name } => {
                        while tool_calls.len() <= index {
                            tool_calls.push(ToolCallAccumulator::default());
                        }
                        tool_calls[index].id = id;
                        tool_calls[index].name = name;
                    }
                    StreamDelta::ToolInputDelta { index, delta } => {
                        if let Some(tc) = tool_calls.get_mut(index) {
                            tc.input_json.push_str(&delta);
                        }
                    }
                    StreamDelta::Usage {
                        input_tokens,
                        output_tokens,
                    } => {
                        let prev = usage.unwrap_or_default();
                        usage = Some(TokenUsage::new(
                            prev.input_tokens + input_tokens,
                            prev.output_tokens + output_tokens,
                        ));
                    }
                    StreamDelta::Stop(_) => {}
                }
            }
            drop(stream);

            tool_calls.retain(|tc| !tc.name.is_empty());
            if tool_calls.is_empty() {
                info!(
                    agent = %agent.name,
                    turns = turn + 1,
                    tool_calls = tool_trace.len(),
                    "Agent invocation complete"
                );
                return Ok(InvocationOutput {
                    text,
                    usage,
                    tool_trace,
                });
            }

            let mut content = Vec::new();
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
            let parsed: Vec<serde_json::Value> = tool_calls
                .iter()
                .map(|tc| parse_tool_input(&tc.input_json))
                .collect();
            for (tc, input) in tool_calls.iter().zip(&parsed) {
                content.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: input.clone(),
                });
            }
            messages.push(ChatMessage {
                role: Role::Assistant,
                content,
            });

            let mut results = Vec::with_capacity(tool_calls.len());
            for (tc, input) in tool_calls.iter().zip(parsed) {
                let result = if agent.tools.iter().any(|t| t == &tc.name) {
                    self.tools
                        .execute(&tc.name, input.clone(), ctx.tool_context())
                        .await
                        .unwrap_or_else(|e| {
                            error!(tool = %tc.name, error = %e, "Tool execution failed");
                            ToolResult::error(e.to_string())
                        })
                } else {
                    ToolResult::error(format!(
                        "Tool '{}' is not available to agent '{}'",
                        tc.name, agent.name
                    ))
                };

                tool_trace.push(ToolTraceEntry {
                    tool: tc.name.clone(),
                    input,
                    output: result.content.clone(),
                    is_error: result.is_error,
                });
                results.push(ContentBlock::ToolResult {
                    tool_use_id: tc.id.clone(),
                    content: result.content,
                    is_error: result.is_error,
                });
            }
            messages.push(ChatMessage::tool_results(results));
        }

        Err(TrellisError::MaxTurnsExceeded(self.max_turns))
    }
}

impl AgentInvoker for LlmInvoker {
    fn invoke<'a>(
        &'a self,
        agent: &'a AgentDefinition,
        prompt: &'a str,
        ctx: &'a InvocationContext,
    ) -> BoxFuture<'a, Result<InvocationOutput>> {
        Box::pin(self.run(agent, prompt, ctx))
    }
}

fn system_prompt(agent: &AgentDefinition) -> String {
    match &agent.response_format {
        Some(schema) => format!(
            "{}\n\nRespond only with JSON that conforms to this JSON schema:\n{}",
            agent.system_prompt, schema
        ),
        None => agent.system_prompt.clone(),
    }
}

fn parse_tool_input(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
}
