use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use trellis_core::config::SessionConfig;
use trellis_core::error::Result;
use trellis_core::traits::SessionBackend;
use trellis_core::types::{AgentDefinition, ExecutionId, SessionHandle};

/// Owns the live per-execution sessions.
///
/// At most one session is kept per execution id. The map lock is never held
/// across a backend call, so a slow create for one run does not stall others.
pub struct SessionManager {
    backend: Arc<dyn SessionBackend>,
    sessions: Mutex<HashMap<ExecutionId, SessionHandle>>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Return the session for `execution_id`, creating it on first use.
    ///
    /// If two creates race for the same id, the first one stored wins and
    /// the other handle is destroyed.
    pub async fn ensure(&self, execution_id: &ExecutionId) -> Result<SessionHandle> {
        if let Some(handle) = self.get(execution_id).await {
            return Ok(handle);
        }

        let created = self.backend.create(execution_id).await?;

        let existing = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(execution_id) {
                Some(existing) => Some(existing.clone()),
                None => {
                    sessions.insert(execution_id.clone(), created.clone());
                    None
                }
            }
        };

        match existing {
            None => {
                info!(
                    execution_id = %execution_id,
                    session_id = %created.session_id,
                    "Session created"
                );
                Ok(created)
            }
            Some(existing) => {
                debug!(
                    execution_id = %execution_id,
                    session_id = %created.session_id,
                    "Duplicate session created, destroying"
                );
                if let Err(e) = self.backend.destroy(&created).await {
                    warn!(
                        execution_id = %execution_id,
                        session_id = %created.session_id,
                        error = %e,
                        "Failed to destroy duplicate session"
                    );
                }
                Ok(existing)
            }
        }
    }

    /// Remove and destroy the session for `execution_id`, if any.
    /// Destroy failures are logged and swallowed.
    pub async fn release(&self, execution_id: &ExecutionId) {
        let handle = self.sessions.lock().await.remove(execution_id);
        let Some(handle) = handle else {
            debug!(execution_id = %execution_id, "No session to release");
            return;
        };

        match self.backend.destroy(&handle).await {
            Ok(()) => info!(
                execution_id = %execution_id,
                session_id = %handle.session_id,
                "Session released"
            ),
            Err(e) => warn!(
                execution_id = %execution_id,
                session_id = %handle.session_id,
                error = %e,
                "Failed to destroy session"
            ),
        }
    }

    pub async fn get(&self, execution_id: &ExecutionId) -> Option<SessionHandle> {
        self.sessions.lock().await.get(execution_id).cloned()
    }

    /// Execution ids currently holding a session.
    pub async fn active(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Release every live session. Used on shutdown.
    pub async fn release_all(&self) {
        let ids: Vec<ExecutionId> = self.sessions.lock().await.keys().cloned().collect();
        if !ids.is_empty() {
            info!(count = ids.len(), "Releasing all sessions");
        }
        for id in ids {
            self.release(&id).await;
        }
    }
}

/// Decides which agents need a session.
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    agents: HashSet<String>,
    tools: HashSet<String>,
}

impl SessionPolicy {
    pub fn new(
        agents: impl IntoIterator<Item = String>,
        tools: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            agents: agents.into_iter().collect(),
            tools: tools.into_iter().collect(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.agents.iter().cloned(), config.tools.iter().cloned())
    }

    /// True if the agent is listed by name or uses a session-bound tool.
    pub fn requires_session(&self, agent: &AgentDefinition) -> bool {
        self.agents.contains(&agent.name) || agent.tools.iter().any(|t| self.tools.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use trellis_test_utils::MockSessionBackend;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let backend = Arc::new(MockSessionBackend::new());
        let manager = SessionManager::new(backend.clone());
        let id = ExecutionId::from_string("exec-1");

        let first = manager.ensure(&id).await.unwrap();
        let second = manager.ensure(&id).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(backend.creates(), 1);
        assert_eq!(manager.active().await, vec![id]);
    }

    #[tokio::test]
    async fn test_release_destroys_once() {
        let backend = Arc::new(MockSessionBackend::new());
        let manager = SessionManager::new(backend.clone());
        let id = ExecutionId::from_string("exec-1");

        manager.ensure(&id).await.unwrap();
        manager.release(&id).await;
        manager.release(&id).await;
        assert_eq!(backend.destroys(), 1);
        assert!(manager.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_destroy_failure_is_swallowed() {
        let backend = Arc::new(MockSessionBackend::failing_destroy());
        let manager = SessionManager::new(backend.clone());
        let id = ExecutionId::from_string("exec-1");

        manager.ensure(&id).await.unwrap();
        manager.release(&id).await;
        assert_eq!(backend.destroys(), 1);
        assert!(manager.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let manager = SessionManager::new(Arc::new(MockSessionBackend::failing_create()));
        let err = manager
            .ensure(&ExecutionId::from_string("exec-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("browser unavailable"));
        assert!(manager.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_release_all() {
        let backend = Arc::new(MockSessionBackend::new());
        let manager = SessionManager::new(backend.clone());
        for id in ["a", "b", "c"] {
            manager.ensure(&ExecutionId::from_string(id)).await.unwrap();
        }
        manager.release_all().await;
        assert_eq!(backend.destroys(), 3);
        assert!(manager.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_create_does_not_block_other_runs() {
        let backend = Arc::new(
            MockSessionBackend::new().slow_create_for("run-a", Duration::from_millis(800)),
        );
        let manager = Arc::new(SessionManager::new(backend.clone()));

        let creating = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure(&ExecutionId::from_string("run-a")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        assert!(manager.get(&ExecutionId::from_string("run-b")).await.is_none());
        manager.ensure(&ExecutionId::from_string("run-b")).await.unwrap();
        assert_eq!(manager.active().await.len(), 1);
        assert!(started.elapsed() < Duration::from_millis(400));

        creating.await.unwrap().unwrap();
        assert_eq!(manager.active().await.len(), 2);
        assert_eq!(backend.creates(), 2);
    }

    #[tokio::test]
    async fn test_racing_creates_keep_one_session() {
        let backend = Arc::new(
            MockSessionBackend::new().slow_create_for("exec-1", Duration::from_millis(50)),
        );
        let manager = SessionManager::new(backend.clone());
        let id = ExecutionId::from_string("exec-1");

        let (first, second) = tokio::join!(manager.ensure(&id), manager.ensure(&id));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(backend.creates(), 2);
        assert_eq!(backend.destroys(), 1);
        assert_eq!(manager.get(&id).await.unwrap().session_id, first.session_id);
    }

    #[test]
    fn test_policy_by_name_and_tool() {
        let policy = SessionPolicy::new(
            vec!["browser".to_string()],
            vec!["browser_navigate".to_string()],
        );
        assert!(policy.requires_session(&AgentDefinition::new("browser", "p")));
        assert!(policy.requires_session(
            &AgentDefinition::new("scraper", "p").with_tools(vec!["browser_navigate".into()])
        ));
        assert!(!policy.requires_session(&AgentDefinition::new("writer", "p")));
    }
}
