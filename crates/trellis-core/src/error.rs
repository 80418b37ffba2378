use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Workflow configuration errors
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Node '{0}' not found in workflow graph")]
    NodeNotFound(String),

    #[error("Node '{node_id}' has no agent assigned")]
    MissingAgent { node_id: String },

    // Invocation errors
    #[error("Agent '{agent}' failed: {message}")]
    Invocation { agent: String, message: String },

    #[error("Agent '{agent}' did not respond within {timeout_secs}s")]
    StepTimeout { agent: String, timeout_secs: u64 },

    #[error("Agent exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),

    #[error("Execution cancelled")]
    Cancelled,

    // Session errors
    #[error("Session error: {0}")]
    Session(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrellisError {
    /// Whether this error stems from the workflow definition rather than a runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::AgentNotFound(_)
                | Self::NodeNotFound(_)
                | Self::MissingAgent { .. }
                | Self::Config(_)
                | Self::ConfigNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;
