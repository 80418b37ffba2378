use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};
use crate::types::AgentDefinition;

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Directory of `*.toml` agent definitions loaded at startup.
    #[serde(default)]
    pub agents_dir: Option<String>,
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
}

fn default_workspace() -> String { "~/.trellis".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Workflow engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a single agent invocation, in seconds. 0 disables the bound.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Max LLM turns (tool round-trips) per agent invocation.
    #[serde(default = "default_max_agent_turns")]
    pub max_agent_turns: usize,
    /// Capacity of the progress channel between engine and transport.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
    /// Delay applied by delay steps that do not set a positive `delayMs`.
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            max_agent_turns: default_max_agent_turns(),
            progress_buffer: default_progress_buffer(),
            default_delay_ms: default_delay_ms(),
        }
    }
}

fn default_step_timeout() -> u64 { 300 }
fn default_max_agent_turns() -> usize { 10 }
fn default_progress_buffer() -> usize { 64 }
fn default_delay_ms() -> u64 { 1000 }

/// Browser session configuration.
///
/// A workflow gets a session when one of its agent steps names an agent in
/// `agents`, or resolves to an agent whose tool list intersects `tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default = "default_session_tools")]
    pub tools: Vec<String>,
    /// Extra W3C capabilities merged into `alwaysMatch` on session creation.
    #[serde(default)]
    pub capabilities: Option<serde_json::Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webdriver_url: default_webdriver_url(),
            agents: vec![],
            tools: default_session_tools(),
            capabilities: None,
        }
    }
}

fn default_webdriver_url() -> String { "http://127.0.0.1:4444".to_string() }
fn default_session_tools() -> Vec<String> {
    vec![
        "browser_navigate".to_string(),
        "browser_page_text".to_string(),
        "browser_current_url".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

/// Execution log persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,
    /// SQLite file. Default: <workspace>/executions.db
    #[serde(default)]
    pub db_path: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: None,
        }
    }
}

fn default_telemetry_enabled() -> bool { true }

impl AppConfig {
    /// Config with every section at its default around the given model.
    pub fn from_model(model: ModelConfig) -> Self {
        Self {
            workspace: default_workspace(),
            agents_dir: None,
            model,
            engine: EngineConfig::default(),
            session: SessionConfig::default(),
            gateway: GatewayConfig::default(),
            telemetry: TelemetryConfig::default(),
            agents: vec![],
        }
    }

    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TrellisError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| TrellisError::Config(e.to_string()))
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.workspace)
    }

    /// Resolve the agent definitions directory, if configured.
    pub fn agents_dir(&self) -> Option<PathBuf> {
        self.agents_dir.as_deref().map(expand_home)
    }

    /// Path of the execution log database.
    pub fn telemetry_db_path(&self) -> PathBuf {
        self.telemetry
            .db_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| self.workspace_dir().join("executions.db"))
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_TRELLIS_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_TRELLIS_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_TRELLIS_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_TRELLIS_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_TRELLIS_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.engine.step_timeout_secs, 300);
        assert_eq!(config.engine.default_delay_ms, 1000);
        assert_eq!(config.engine.progress_buffer, 64);
        assert!(!config.session.enabled);
        assert_eq!(config.session.tools.len(), 3);
        assert!(config.telemetry.enabled);
        assert_eq!(config.gateway.bind, "127.0.0.1:18790");
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_agents_table() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"

[[agents]]
name = "researcher"
system_prompt = "You research topics."
tools = ["browser_navigate"]
default_task = "Collect three sources."

[[agents]]
name = "writer"
system_prompt = "You write summaries."
model = "gpt-4o"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].tools, vec!["browser_navigate"]);
        assert_eq!(config.agents[1].model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_telemetry_path_defaults_to_workspace() {
        let toml_str = r#"
workspace = "/tmp/trellis-ws"

[model]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.telemetry_db_path(),
            PathBuf::from("/tmp/trellis-ws/executions.db")
        );
    }
}
