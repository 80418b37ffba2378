use std::collections::HashSet;

use trellis_core::types::ExecutionId;

use super::node::non_blank;

/// State threaded from step to step within one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    goal: String,
    previous_output: String,
    visited: HashSet<String>,
    steps: usize,
}

impl ExecutionContext {
    pub fn new(execution_id: ExecutionId, goal: impl Into<String>) -> Self {
        let goal = goal.into();
        Self {
            execution_id,
            previous_output: format!("Initial goal: {}", goal),
            goal,
            visited: HashSet::new(),
            steps: 0,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn previous_output(&self) -> &str {
        &self.previous_output
    }

    pub fn into_output(self) -> String {
        self.previous_output
    }

    /// Number of steps dispatched so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Mark `node_id` visited. Returns false if it already was.
    pub fn visit(&mut self, node_id: &str) -> bool {
        let fresh = self.visited.insert(node_id.to_string());
        if fresh {
            self.steps += 1;
        }
        fresh
    }

    pub fn set_output(&mut self, output: impl Into<String>) {
        self.previous_output = output.into();
    }

    /// Task for an agent step: the node's task, then the agent default, then the goal.
    pub fn resolve_task<'a>(
        &'a self,
        node_task: Option<&'a str>,
        agent_default: Option<&'a str>,
    ) -> &'a str {
        non_blank(node_task)
            .or_else(|| non_blank(agent_default))
            .unwrap_or(&self.goal)
    }

    /// Build the prompt for the next agent step.
    pub fn prompt_for(&self, task: &str) -> String {
        format!(
            "Overall Goal: {}\n\nPrevious Step Result:\n{}\n\nYour Specific Task for this step:\n{}",
            self.goal, self.previous_output, task
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(ExecutionId::from_string("exec-1"), "Summarize Rust")
    }

    #[test]
    fn test_initial_output() {
        assert_eq!(ctx().previous_output(), "Initial goal: Summarize Rust");
    }

    #[test]
    fn test_visit_once() {
        let mut ctx = ctx();
        assert!(ctx.visit("a"));
        assert!(!ctx.visit("a"));
        assert!(ctx.visit("b"));
        assert_eq!(ctx.steps(), 2);
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let mut ctx = ctx();
        ctx.set_output("Found three sources");
        let prompt = ctx.prompt_for("Write a draft");
        assert_eq!(
            prompt,
            "Overall Goal: Summarize Rust\n\nPrevious Step Result:\nFound three sources\n\nYour Specific Task for this step:\nWrite a draft"
        );
    }

    #[test]
    fn test_task_fallback_chain() {
        let ctx = ctx();
        assert_eq!(ctx.resolve_task(Some("node"), Some("agent")), "node");
        assert_eq!(ctx.resolve_task(Some("  "), Some("agent")), "agent");
        assert_eq!(ctx.resolve_task(None, Some("")), "Summarize Rust");
        assert_eq!(ctx.resolve_task(None, None), "Summarize Rust");
    }
}
