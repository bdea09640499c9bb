use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("LLM error: {0}")]
    Llm(#[from] yb_llm::LlmError),

    #[error("state store error: {0}")]
    Store(String),

    /// An engine bug, never a user-facing condition.
    #[error("engine invariant violated: {0}")]
    Invariant(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("room state json: {e}"))
    }
}
