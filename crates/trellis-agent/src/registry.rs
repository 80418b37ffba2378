use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use trellis_core::config::AppConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::AgentResolver;
use trellis_core::types::AgentDefinition;

/// In-memory agent registry, populated once at startup.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `[[agents]]` in the config, then every `*.toml` in `agents_dir`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        for agent in &config.agents {
            registry.insert(agent.clone());
        }
        if let Some(dir) = config.agents_dir() {
            let loaded = registry.load_dir(&dir)?;
            debug!(path = %dir.display(), loaded, "Loaded agent directory");
        }
        info!(agents = registry.len(), "Agent registry ready");
        Ok(registry)
    }

    /// Add an agent. A later definition replaces an earlier one of the same name.
    pub fn insert(&mut self, agent: AgentDefinition) {
        let name = agent.name.clone();
        if self.agents.insert(name.clone(), Arc::new(agent)).is_some() {
            warn!(agent = %name, "Agent redefined, later definition wins");
        }
    }

    /// Load one agent per `*.toml` file in `dir`, in file-name order.
    ///
    /// A missing directory loads nothing. A file that fails to parse is a
    /// config error.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %dir.display(), "Agents directory does not exist");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in &paths {
            let content = std::fs::read_to_string(path)?;
            let agent: AgentDefinition = toml::from_str(&content).map_err(|e| {
                TrellisError::Config(format!("invalid agent file {}: {}", path.display(), e))
            })?;
            debug!(agent = %agent.name, path = %path.display(), "Loaded agent");
            self.insert(agent);
        }

        Ok(paths.len())
    }

    /// All agents, sorted by name.
    pub fn list(&self) -> Vec<Arc<AgentDefinition>> {
        let mut agents: Vec<_> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentResolver for AgentRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_test_utils::{temp_workspace, test_config};

    #[test]
    fn test_from_config_agents() {
        let dir = temp_workspace();
        let registry = AgentRegistry::from_config(&test_config(dir.path())).unwrap();
        let names: Vec<String> = registry.list().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["researcher", "writer"]);
        assert!(registry.resolve("writer").is_some());
        assert!(registry.resolve("editor").is_none());
    }

    #[test]
    fn test_load_dir_overrides_config() {
        let dir = temp_workspace();
        let agents_dir = dir.path().join("agents");
        std::fs::create_dir_all(&agents_dir).unwrap();
        std::fs::write(
            agents_dir.join("writer.toml"),
            "name = \"writer\"\nsystem_prompt = \"You write tersely.\"\ndefault_task = \"Draft it\"\n",
        )
        .unwrap();
        std::fs::write(
            agents_dir.join("editor.toml"),
            "name = \"editor\"\nsystemPrompt = \"You edit.\"\ntoolNames = [\"browser_navigate\"]\n",
        )
        .unwrap();
        std::fs::write(agents_dir.join("README.md"), "not an agent").unwrap();

        let mut config = test_config(dir.path());
        config.agents_dir = Some(agents_dir.display().to_string());
        let registry = AgentRegistry::from_config(&config).unwrap();

        assert_eq!(registry.len(), 3);
        let writer = registry.resolve("writer").unwrap();
        assert_eq!(writer.system_prompt, "You write tersely.");
        assert_eq!(writer.default_task.as_deref(), Some("Draft it"));
        let editor = registry.resolve("editor").unwrap();
        assert_eq!(editor.tools, vec!["browser_navigate"]);
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = temp_workspace();
        let mut registry = AgentRegistry::new();
        assert_eq!(registry.load_dir(&dir.path().join("nope")).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = temp_workspace();
        std::fs::write(dir.path().join("broken.toml"), "name = ").unwrap();
        let mut registry = AgentRegistry::new();
        let err = registry.load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, TrellisError::Config(_)));
    }
}
