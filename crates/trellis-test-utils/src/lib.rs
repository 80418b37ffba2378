//! Mocks and fixtures shared by the Trellis test suites.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;

use trellis_core::config::AppConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{AgentInvoker, SessionBackend, TelemetrySink};
use trellis_core::types::*;

/// One recorded call to [`MockInvoker`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub agent: String,
    pub prompt: String,
    pub execution_id: ExecutionId,
    pub session: Option<SessionHandle>,
}

/// Invoker with scripted replies.
///
/// Agents without a script reply `"{agent} done"`. Agents in the failing set
/// return an `Invocation` error. Every call is recorded in order.
#[derive(Default)]
pub struct MockInvoker {
    replies: Mutex<HashMap<String, Vec<String>>>,
    failing: HashSet<String>,
    usage: Option<TokenUsage>,
    latency: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `agent`. Replies are consumed in order; the last one repeats.
    pub fn reply(self, agent: &str, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .push(text.to_string());
        self
    }

    pub fn failing(mut self, agent: &str) -> Self {
        self.failing.insert(agent.to_string());
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage::new(input_tokens, output_tokens));
        self
    }

    /// Sleep this long inside every invocation (cancellable).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.prompt).collect()
    }

    fn next_reply(&self, agent: &str) -> String {
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(agent) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => format!("{} done", agent),
        }
    }
}

impl AgentInvoker for MockInvoker {
    fn invoke<'a>(
        &'a self,
        agent: &'a AgentDefinition,
        prompt: &'a str,
        ctx: &'a InvocationContext,
    ) -> BoxFuture<'a, Result<InvocationOutput>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(RecordedCall {
                agent: agent.name.clone(),
                prompt: prompt.to_string(),
                execution_id: ctx.execution_id.clone(),
                session: ctx.session.clone(),
            });

            if let Some(latency) = self.latency {
                tokio::select! {
                    _ = tokio::time::sleep(latency) => {}
                    _ = ctx.cancel.cancelled() => return Err(TrellisError::Cancelled),
                }
            }

            if self.failing.contains(&agent.name) {
                return Err(TrellisError::Invocation {
                    agent: agent.name.clone(),
                    message: "model unavailable".to_string(),
                });
            }

            Ok(InvocationOutput {
                text: self.next_reply(&agent.name),
                usage: self.usage,
                tool_trace: vec![],
            })
        })
    }
}

/// Session backend that counts create/destroy calls.
///
/// A create only counts once it completes, so a create abandoned mid-delay
/// leaves `creates()` unchanged.
#[derive(Default)]
pub struct MockSessionBackend {
    creates: AtomicUsize,
    destroys: AtomicUsize,
    fail_create: bool,
    fail_destroy: bool,
    create_delays: HashMap<ExecutionId, Duration>,
}

impl MockSessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn failing_destroy() -> Self {
        Self {
            fail_destroy: true,
            ..Self::default()
        }
    }

    /// Make session creation for `execution_id` take `delay`.
    pub fn slow_create_for(mut self, execution_id: &str, delay: Duration) -> Self {
        self.create_delays
            .insert(ExecutionId::from_string(execution_id), delay);
        self
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

impl SessionBackend for MockSessionBackend {
    fn create<'a>(&'a self, execution_id: &'a ExecutionId) -> BoxFuture<'a, Result<SessionHandle>> {
        Box::pin(async move {
            if let Some(delay) = self.create_delays.get(execution_id) {
                tokio::time::sleep(*delay).await;
            }
            if self.fail_create {
                return Err(TrellisError::Session("browser unavailable".to_string()));
            }
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(SessionHandle {
                session_id: format!("mock-session-{}", n),
                execution_id: execution_id.clone(),
                endpoint: None,
                created_at: Utc::now(),
            })
        })
    }

    fn destroy<'a>(&'a self, _handle: &'a SessionHandle) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            if self.fail_destroy {
                return Err(TrellisError::Session("already gone".to_string()));
            }
            Ok(())
        })
    }
}

/// Telemetry sink that keeps entries in memory.
#[derive(Default)]
pub struct MemoryTelemetry {
    entries: Mutex<Vec<ExecutionLogEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn append(&self, entry: ExecutionLogEntry) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        })
    }
}

/// Telemetry sink whose every append fails.
pub struct FailingTelemetry;

impl TelemetrySink for FailingTelemetry {
    fn append(&self, _entry: ExecutionLogEntry) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(TrellisError::Database("disk full".to_string())) })
    }
}

// ── Wire fixtures ───────────────────────────────────────────────

pub fn agent_node_json(id: &str, agent: &str, task: Option<&str>) -> serde_json::Value {
    let mut data = serde_json::json!({ "agentName": agent });
    if let Some(task) = task {
        data["task"] = serde_json::json!(task);
    }
    serde_json::json!({ "id": id, "type": "agentNode", "data": data })
}

pub fn delay_node_json(id: &str, delay_ms: i64) -> serde_json::Value {
    serde_json::json!({ "id": id, "type": "delayNode", "data": { "delayMs": delay_ms } })
}

pub fn edge_json(source: &str, target: &str) -> serde_json::Value {
    serde_json::json!({
        "id": format!("e-{}-{}", source, target),
        "source": source,
        "target": target,
    })
}

pub fn run_request_json(
    goal: &str,
    nodes: Vec<serde_json::Value>,
    edges: Vec<serde_json::Value>,
) -> serde_json::Value {
    serde_json::json!({ "goal": goal, "nodes": nodes, "edges": edges })
}

/// Minimal config rooted in a temporary workspace.
pub fn test_config(workspace: &std::path::Path) -> AppConfig {
    let toml_str = format!(
        r#"
workspace = "{}"

[model]
provider = "openai"
model_id = "test-model"

[[agents]]
name = "researcher"
system_prompt = "You research."

[[agents]]
name = "writer"
system_prompt = "You write."
"#,
        workspace.display()
    );
    toml::from_str(&toml_str).expect("valid test config")
}

/// Temporary directory that lives as long as the returned guard.
pub fn temp_workspace() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}
