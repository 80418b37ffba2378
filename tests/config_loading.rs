use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use trellis_agent::{AgentRegistry, SessionPolicy, WorkflowEngine, WorkflowRequest};
use trellis_core::config::AppConfig;
use trellis_core::error::TrellisError;
use trellis_core::types::{ExecutionId, ProgressEvent};
use trellis_test_utils::*;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
workspace = "/tmp/trellis-test"
agents_dir = "/tmp/trellis-test/agents"

[model]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-test-key"
base_url = "http://localhost:8080/v1/chat/completions"
max_tokens = 2048
temperature = 0.5

[engine]
step_timeout_secs = 60
max_agent_turns = 4
progress_buffer = 16
default_delay_ms = 250

[session]
enabled = true
webdriver_url = "http://127.0.0.1:9515"
agents = ["scraper"]
tools = ["browser_navigate"]

[session.capabilities]
browserName = "chrome"

[gateway]
bind = "0.0.0.0:9999"

[telemetry]
enabled = false
db_path = "/tmp/trellis-test/logs.db"

[[agents]]
name = "scraper"
system_prompt = "You scrape pages."
tools = ["browser_navigate", "browser_page_text"]
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.model_id, "gpt-4o-mini");
    assert_eq!(config.model.api_key.as_deref(), Some("sk-test-key"));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.engine.step_timeout_secs, 60);
    assert_eq!(config.engine.max_agent_turns, 4);
    assert_eq!(config.engine.default_delay_ms, 250);
    assert!(config.session.enabled);
    assert_eq!(config.session.agents, vec!["scraper"]);
    assert_eq!(
        config.session.capabilities.as_ref().unwrap()["browserName"],
        "chrome"
    );
    assert_eq!(config.gateway.bind, "0.0.0.0:9999");
    assert!(!config.telemetry.enabled);
    assert_eq!(
        config.telemetry_db_path(),
        std::path::PathBuf::from("/tmp/trellis-test/logs.db")
    );
    assert_eq!(config.agents.len(), 1);

    let policy = SessionPolicy::from_config(&config.session);
    assert!(policy.requires_session(&config.agents[0]));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("TRELLIS_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "gpt-4o-mini"
api_key = "${TRELLIS_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key.as_deref(), Some("expanded-key-value"));

    std::env::remove_var("TRELLIS_TEST_API_KEY");
}

#[test]
fn test_missing_config_file() {
    let dir = temp_workspace();
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, TrellisError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_config_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[model]\nmax_tokens = \"lots\"\n").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, TrellisError::Config(_)));
}

#[test]
fn test_agents_dir_merges_with_inline_agents() {
    let ws = temp_workspace();
    let agents_dir = ws.path().join("agents");
    std::fs::create_dir_all(&agents_dir).unwrap();
    std::fs::write(
        agents_dir.join("summarizer.toml"),
        "name = \"summarizer\"\nsystem_prompt = \"You summarize.\"\ndefault_task = \"Summarize.\"\n",
    )
    .unwrap();
    std::fs::write(
        agents_dir.join("writer.toml"),
        "name = \"writer\"\nsystem_prompt = \"You write better.\"\n",
    )
    .unwrap();

    let mut config = test_config(ws.path());
    config.agents_dir = Some(agents_dir.display().to_string());

    let registry = AgentRegistry::from_config(&config).unwrap();
    let names: Vec<String> = registry.list().iter().map(|a| a.name.clone()).collect();
    assert_eq!(names, vec!["researcher", "summarizer", "writer"]);

    let writer = registry.list().into_iter().find(|a| a.name == "writer").unwrap();
    assert_eq!(writer.system_prompt, "You write better.");
}

#[tokio::test]
async fn test_config_driven_run() {
    let ws = temp_workspace();
    let mut config = test_config(ws.path());
    config.engine.default_delay_ms = 5;

    let registry = Arc::new(AgentRegistry::from_config(&config).unwrap());
    let invoker = Arc::new(MockInvoker::new().reply("writer", "Final draft"));
    let engine = Arc::new(WorkflowEngine::new(registry, invoker, config.engine.clone()));

    let request: WorkflowRequest = serde_json::from_value(run_request_json(
        "Write about rivers",
        vec![
            agent_node_json("r", "researcher", None),
            delay_node_json("d", 0),
            agent_node_json("w", "writer", None),
        ],
        vec![
            edge_json("goal_node", "r"),
            edge_json("r", "d"),
            edge_json("d", "w"),
        ],
    ))
    .unwrap();

    let (handle, receiver) = engine.spawn(request, ExecutionId::new(), CancellationToken::new());
    let events = receiver.collect().await;

    assert_eq!(handle.await.unwrap().unwrap(), "Final draft");
    assert_eq!(events.len(), 7);
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::FinalResponse {
            content: "Final draft".to_string()
        })
    );
}
