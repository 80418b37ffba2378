use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis_agent::{
    AgentRegistry, LlmInvoker, SessionManager, SessionPolicy, WorkflowEngine, WorkflowRequest,
};
use trellis_core::config::{AppConfig, ModelConfig};
use trellis_core::types::ExecutionId;
use trellis_gateway::{AppState, GatewayServer, RunningExecutions};
use trellis_memory::SqliteLogStore;
use trellis_tools::{ToolRegistry, WebDriverBackend};

#[derive(Parser)]
#[command(name = "trellis", version, about = "Workflow engine for LLM agent graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "trellis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve,
    /// Run a workflow file and print progress as NDJSON
    Run {
        /// Workflow JSON file ({"goal", "nodes", "edges"})
        #[arg(short, long)]
        workflow: PathBuf,
        /// Override the goal stored in the file
        #[arg(short, long)]
        goal: Option<String>,
    },
    /// List registered agents
    Agents,
    /// Show execution logs
    Logs {
        /// Number of recent entries
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Show per-agent aggregates instead of entries
        #[arg(long)]
        stats: bool,
        /// Only entries for this execution id
        #[arg(long)]
        execution: Option<String>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trellis=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "trellis", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace)?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Agents) => {
            let registry = AgentRegistry::from_config(&config)?;
            if registry.is_empty() {
                println!("No agents registered.");
            }
            for agent in registry.list() {
                let tools = if agent.tools.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", agent.tools.join(", "))
                };
                println!(
                    "{}{}  {}",
                    agent.name,
                    tools,
                    agent.description.as_deref().unwrap_or("")
                );
            }
        }
        Some(Commands::Logs {
            limit,
            stats,
            execution,
        }) => {
            let store = SqliteLogStore::open(&config.telemetry_db_path())?;
            if stats {
                for s in store.agent_stats()? {
                    println!(
                        "{:<24} runs={:<6} errors={:<6} avg={:.0}ms tokens={}",
                        s.agent_name, s.runs, s.errors, s.avg_latency_ms, s.total_tokens
                    );
                }
            } else {
                let entries = match execution {
                    Some(id) => store.for_execution(&ExecutionId::from_string(&id))?,
                    None => store.recent(limit)?,
                };
                for entry in entries {
                    println!("{}", serde_json::to_string(&entry)?);
                }
            }
        }
        Some(Commands::Run { workflow, goal }) => {
            let content = std::fs::read_to_string(&workflow)?;
            let mut request: WorkflowRequest = serde_json::from_str(&content)?;
            if let Some(goal) = goal {
                request.goal = goal;
            }
            if request.goal.trim().is_empty() {
                anyhow::bail!("workflow goal must not be empty");
            }

            let runtime = build_runtime(&config)?;
            let cancel = shutdown_on_ctrl_c("Cancelling workflow...");
            let (handle, mut receiver) =
                runtime
                    .engine
                    .spawn(request, ExecutionId::new(), cancel.clone());

            let mut stdout = std::io::stdout();
            while let Some(event) = receiver.recv().await {
                stdout.write_all(event.to_ndjson_line().as_bytes())?;
                stdout.flush()?;
            }

            let outcome = handle.await?;
            if let Some(sessions) = &runtime.sessions {
                sessions.release_all().await;
            }
            if outcome.is_err() {
                std::process::exit(1);
            }
        }
        Some(Commands::Serve) | None => {
            let runtime = build_runtime(&config)?;
            let state = Arc::new(AppState {
                engine: runtime.engine,
                registry: runtime.registry,
                sessions: runtime.sessions,
                log_store: runtime.log_store,
                running: Arc::new(RunningExecutions::new()),
            });
            info!(bind = %config.gateway.bind, "Starting gateway");
            let server = GatewayServer::new(config.gateway.clone(), state);
            let cancel = shutdown_on_ctrl_c("Shutting down gateway...");
            server.run(cancel).await?;
        }
        Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}

/// Everything a run needs, wired from config.
struct Runtime {
    engine: Arc<WorkflowEngine>,
    registry: Arc<AgentRegistry>,
    sessions: Option<Arc<SessionManager>>,
    log_store: Option<Arc<SqliteLogStore>>,
}

fn build_runtime(config: &AppConfig) -> anyhow::Result<Runtime> {
    let llm = trellis_llm::create_client(&config.model)?;

    let tools = if config.session.enabled {
        ToolRegistry::with_browser(&config.session.webdriver_url)
    } else {
        ToolRegistry::new()
    };

    let invoker = LlmInvoker::new(
        Arc::from(llm),
        config.model.clone(),
        Arc::new(tools),
        config.engine.max_agent_turns,
    );

    let registry = Arc::new(AgentRegistry::from_config(config)?);
    info!(agents = registry.len(), "Agent registry loaded");

    let mut engine = WorkflowEngine::new(registry.clone(), Arc::new(invoker), config.engine.clone());

    let log_store = if config.telemetry.enabled {
        let path = config.telemetry_db_path();
        let store = Arc::new(SqliteLogStore::open(&path)?);
        info!(path = %path.display(), "Execution logging enabled");
        engine = engine.with_telemetry(store.clone());
        Some(store)
    } else {
        None
    };

    let sessions = if config.session.enabled {
        let mut backend = WebDriverBackend::new(&config.session.webdriver_url);
        if let Some(caps) = &config.session.capabilities {
            backend = backend.with_capabilities(caps.clone());
        }
        let manager = Arc::new(SessionManager::new(Arc::new(backend)));
        engine = engine.with_sessions(manager.clone(), SessionPolicy::from_config(&config.session));
        info!(webdriver = %config.session.webdriver_url, "Browser sessions enabled");
        Some(manager)
    } else {
        None
    };

    Ok(Runtime {
        engine: Arc::new(engine),
        registry,
        sessions,
        log_store,
    })
}

fn shutdown_on_ctrl_c(message: &'static str) -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("{}", message);
        cancel_clone.cancel();
    });
    cancel
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    if let Some(home_config) = dirs_home().map(|h| h.join(".trellis").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    warn!("No config file found, using environment (TRELLIS_MODEL, OPENAI_API_KEY, TRELLIS_BASE_URL)");
    Ok(env_config())
}

fn env_config() -> AppConfig {
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    let base_url = std::env::var("TRELLIS_BASE_URL").ok();

    // Without a key or an explicit endpoint, assume a local Ollama.
    let (model_id, base_url) = match (&api_key, base_url) {
        (None, None) => (
            "llama3.2".to_string(),
            Some("http://localhost:11434/v1/chat/completions".to_string()),
        ),
        (_, base_url) => ("gpt-4o-mini".to_string(), base_url),
    };

    AppConfig::from_model(ModelConfig {
        provider: "openai".to_string(),
        model_id: std::env::var("TRELLIS_MODEL").unwrap_or(model_id),
        api_key,
        base_url,
        max_tokens: 4096,
        temperature: 0.0,
    })
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
