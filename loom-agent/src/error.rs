use crate::ooda::OodaPhase;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The LLM backend could not be reached or answered with an unusable body.
    #[error("provider error: {0}")]
    Provider(#[from] loom_llm::LlmError),

    #[error("tool setup error: {0}")]
    Tool(#[from] loom_tools::ToolError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("ooda cycle failed during {phase}: {message}")]
    CycleFailure { phase: OodaPhase, message: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Store(format!("blocking task failed: {e}"))
    }
}
