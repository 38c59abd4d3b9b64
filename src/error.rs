use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid worker spec `{0}` (expected `id` or `id:role`)")]
    InvalidWorker(String),
}

/// Errors raised by the team coordinator and its state store.
///
/// Only references to entities that do not exist are fatal. Tool misuse is
/// reported back to the calling agent as a JSON error instead.
#[derive(Debug, thiserror::Error)]
pub enum TeamError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Message {0} is not an ask")]
    NotAnAsk(String),

    #[error("Invalid team state: {0}")]
    InvalidState(String),

    #[error("Team state snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Errors related to driving an agent session against an LLM.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Ollama not reachable at {url}: {message}")]
    OllamaUnavailable { url: String, message: String },

    #[error("Model '{model}' not available in Ollama: {message}")]
    ModelNotAvailable { model: String, message: String },

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Session cancelled")]
    Cancelled,
}
