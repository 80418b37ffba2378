//! Workflow execution engine.
//!
//! One call to [`WorkflowEngine::execute`] walks a workflow graph from the
//! start node, one step at a time, following the first outgoing edge of each
//! step. Agent steps build a prompt from the goal, the previous output and the
//! step task; delay steps wait. Every run ends with exactly one terminal
//! progress event, and its session (if one was created) is released before
//! that event is sent.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use trellis_core::config::EngineConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{AgentInvoker, AgentResolver, TelemetrySink};
use trellis_core::types::*;

use crate::graph::{Edge, ExecutionContext, Node, NodeKind, WorkflowGraph, START_NODE_ID};
use crate::progress::{progress_channel, ProgressReceiver, ProgressSender};
use crate::session::{SessionManager, SessionPolicy};

/// A workflow run submission: the goal plus the graph to walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub goal: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// User-visible text for a failed run.
pub fn failure_message(err: &TrellisError) -> String {
    format!("Workflow execution failed: {}", err)
}

struct Sessions {
    manager: Arc<SessionManager>,
    policy: SessionPolicy,
}

pub struct WorkflowEngine {
    resolver: Arc<dyn AgentResolver>,
    invoker: Arc<dyn AgentInvoker>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    sessions: Option<Sessions>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        resolver: Arc<dyn AgentResolver>,
        invoker: Arc<dyn AgentInvoker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver,
            invoker,
            telemetry: None,
            sessions: None,
            config,
        }
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_sessions(mut self, manager: Arc<SessionManager>, policy: SessionPolicy) -> Self {
        self.sessions = Some(Sessions { manager, policy });
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn a run on the runtime and hand back its progress receiver.
    pub fn spawn(
        self: &Arc<Self>,
        request: WorkflowRequest,
        execution_id: ExecutionId,
        cancel: CancellationToken,
    ) -> (JoinHandle<Result<String>>, ProgressReceiver) {
        let (progress, receiver) = progress_channel(self.config.progress_buffer);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.execute(request, execution_id, progress, cancel).await
        });
        (handle, receiver)
    }

    /// Run a workflow to completion.
    ///
    /// Returns the final output on success. On failure the `error` progress
    /// event has already been sent when this returns.
    pub async fn execute(
        &self,
        request: WorkflowRequest,
        execution_id: ExecutionId,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<String> {
        let span = info_span!("workflow", execution_id = %execution_id);
        self.run(request, execution_id, progress, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request: WorkflowRequest,
        execution_id: ExecutionId,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<String> {
        let start = Instant::now();
        let graph = WorkflowGraph::new(request.nodes, request.edges);
        let mut ctx = ExecutionContext::new(execution_id.clone(), request.goal);
        let needs_session = self.plan_sessions(&graph);
        info!(
            nodes = graph.len(),
            session_agents = needs_session.len(),
            "Workflow run started"
        );

        let outcome = self
            .traverse(&graph, &mut ctx, &needs_session, &progress, &cancel)
            .await;

        if let Some(sessions) = &self.sessions {
            sessions.manager.release(&execution_id).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!(steps = ctx.steps(), elapsed_ms, "Workflow run completed");
                let content = ctx.into_output();
                progress.final_response(content.clone()).await;
                Ok(content)
            }
            Err(e) => {
                error!(steps = ctx.steps(), elapsed_ms, error = %e, "Workflow run failed");
                progress.error(failure_message(&e)).await;
                Err(e)
            }
        }
    }

    /// Names of the graph's agents that need a session under the current policy.
    fn plan_sessions(&self, graph: &WorkflowGraph) -> HashSet<String> {
        let Some(sessions) = &self.sessions else {
            return HashSet::new();
        };
        graph
            .agent_names()
            .into_iter()
            .filter(|name| match self.resolver.resolve(name) {
                Some(agent) => sessions.policy.requires_session(&agent),
                None => false,
            })
            .map(String::from)
            .collect()
    }

    async fn traverse(
        &self,
        graph: &WorkflowGraph,
        ctx: &mut ExecutionContext,
        needs_session: &HashSet<String>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut current = graph.first_successor(START_NODE_ID).cloned();
        if current.is_none() {
            debug!("No step connected to the start node");
        }

        while let Some(node_id) = current {
            if cancel.is_cancelled() {
                return Err(TrellisError::Cancelled);
            }
            if !ctx.visit(&node_id) {
                warn!(node_id = %node_id, "Node already visited, stopping traversal");
                break;
            }

            let node = graph
                .node_by_id(&node_id)
                .ok_or_else(|| TrellisError::NodeNotFound(node_id.clone()))?;
            progress.node_executing(&node.id).await;

            match node.kind {
                NodeKind::AgentStep => {
                    self.run_agent_step(node, ctx, needs_session, cancel).await?
                }
                NodeKind::DelayStep => self.run_delay_step(node, ctx, cancel).await?,
                NodeKind::Start | NodeKind::Other => {
                    debug!(node_id = %node.id, kind = ?node.kind, "No-op step")
                }
            }

            progress.node_finished(&node.id, ctx.previous_output()).await;
            current = graph.first_successor(&node_id).cloned();
        }

        Ok(())
    }

    async fn run_agent_step(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        needs_session: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let agent_name = node.agent_name().ok_or_else(|| TrellisError::MissingAgent {
            node_id: node.id.clone(),
        })?;
        let agent = self
            .resolver
            .resolve(agent_name)
            .ok_or_else(|| TrellisError::AgentNotFound(agent_name.to_string()))?;

        let session = tokio::select! {
            session = self.session_for(&agent.name, needs_session, &ctx.execution_id) => session?,
            _ = cancel.cancelled() => return Err(TrellisError::Cancelled),
        };
        let task = ctx.resolve_task(node.task(), agent.default_task.as_deref());
        let prompt = ctx.prompt_for(task);
        let invocation = InvocationContext {
            execution_id: ctx.execution_id.clone(),
            session,
            cancel: cancel.clone(),
        };

        info!(node_id = %node.id, agent = %agent.name, "Invoking agent");
        let started = Instant::now();
        let result = self.invoke_bounded(&agent, &prompt, &invocation).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                self.record(ExecutionLogEntry::success(
                    &ctx.execution_id,
                    &agent.name,
                    latency_ms,
                    output.usage,
                ))
                .await;
                debug!(
                    node_id = %node.id,
                    latency_ms,
                    tool_calls = output.tool_trace.len(),
                    "Agent step finished"
                );
                if output.text.trim().is_empty() {
                    ctx.set_output(format!("Agent '{}' returned no text.", agent.name));
                } else {
                    ctx.set_output(output.text);
                }
                Ok(())
            }
            Err(e) => {
                self.record(ExecutionLogEntry::error(
                    &ctx.execution_id,
                    &agent.name,
                    latency_ms,
                    e.to_string(),
                ))
                .await;
                error!(node_id = %node.id, agent = %agent.name, error = %e, "Agent step failed");
                Err(e)
            }
        }
    }

    /// Session to hand to an agent: created on demand for agents that need
    /// one, otherwise whatever the run already holds.
    async fn session_for(
        &self,
        agent_name: &str,
        needs_session: &HashSet<String>,
        execution_id: &ExecutionId,
    ) -> Result<Option<SessionHandle>> {
        let Some(sessions) = &self.sessions else {
            return Ok(None);
        };
        if needs_session.contains(agent_name) {
            sessions.manager.ensure(execution_id).await.map(Some)
        } else {
            Ok(sessions.manager.get(execution_id).await)
        }
    }

    async fn invoke_bounded(
        &self,
        agent: &AgentDefinition,
        prompt: &str,
        ctx: &InvocationContext,
    ) -> Result<InvocationOutput> {
        let call = self.invoker.invoke(agent, prompt, ctx);
        let timeout_secs = self.config.step_timeout_secs;
        let bounded = async move {
            if timeout_secs == 0 {
                return call.await;
            }
            match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
                Ok(result) => result,
                Err(_) => Err(TrellisError::StepTimeout {
                    agent: agent.name.clone(),
                    timeout_secs,
                }),
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = ctx.cancel.cancelled() => Err(TrellisError::Cancelled),
        }
    }

    async fn run_delay_step(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ms = node.delay_ms(self.config.default_delay_ms);
        debug!(node_id = %node.id, delay_ms = ms, "Delay step");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            _ = cancel.cancelled() => return Err(TrellisError::Cancelled),
        }
        ctx.set_output(format!("Waited for {}ms before continuing.", ms));
        Ok(())
    }

    async fn record(&self, entry: ExecutionLogEntry) {
        let Some(sink) = &self.telemetry else {
            return;
        };
        if let Err(e) = sink.append(entry).await {
            warn!(error = %e, "Failed to record execution log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message() {
        let err = TrellisError::AgentNotFound("ghost".into());
        assert_eq!(
            failure_message(&err),
            "Workflow execution failed: Agent not found: ghost"
        );
    }

    #[test]
    fn test_request_from_caller_json() {
        let json = serde_json::json!({
            "goal": "Plan a trip",
            "nodes": [
                {"id": "a", "type": "agentNode", "data": {"agentName": "planner"}},
                {"id": "d", "type": "delayNode", "data": {"delayMs": 500}}
            ],
            "edges": [{"id": "e1", "source": "goal_node", "target": "a"}]
        });
        let request: WorkflowRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.goal, "Plan a trip");
        assert_eq!(request.nodes.len(), 2);
        assert_eq!(request.nodes[1].delay_ms(1000), 500);
        assert_eq!(request.edges[0].target, "a");
    }

    #[test]
    fn test_request_without_graph() {
        let request: WorkflowRequest = serde_json::from_str(r#"{"goal":"x"}"#).unwrap();
        assert!(request.nodes.is_empty());
        assert!(request.edges.is_empty());
    }
}
