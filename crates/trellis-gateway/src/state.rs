use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use trellis_agent::{AgentRegistry, SessionManager, WorkflowEngine};
use trellis_core::types::ExecutionId;
use trellis_memory::SqliteLogStore;

/// Shared application state for axum handlers.
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<AgentRegistry>,
    pub sessions: Option<Arc<SessionManager>>,
    pub log_store: Option<Arc<SqliteLogStore>>,
    pub running: Arc<RunningExecutions>,
}

/// Cancellation tokens of the runs currently in flight, by execution id.
#[derive(Default)]
pub struct RunningExecutions {
    tokens: Mutex<HashMap<ExecutionId, CancellationToken>>,
}

impl RunningExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ExecutionId, token: CancellationToken) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(id, token);
        }
    }

    pub fn remove(&self, id: &ExecutionId) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(id);
        }
    }

    /// Cancel a running execution. Returns false if the id is unknown.
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        let token = match self.tokens.lock() {
            Ok(tokens) => tokens.get(id).cloned(),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        if let Ok(tokens) = self.tokens.lock() {
            for token in tokens.values() {
                token.cancel();
            }
        }
    }

    /// Ids of the runs in flight, sorted.
    pub fn ids(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = match self.tokens.lock() {
            Ok(tokens) => tokens.keys().cloned().collect(),
            Err(_) => vec![],
        };
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}
