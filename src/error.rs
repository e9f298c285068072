//! Error kinds for the pipeline execution engine.
//!
//! The engine reasons about error *kinds*, never by matching message
//! strings. Each layer raises its own enum; [`EngineError`] is the
//! top-level kind a caller of the Public Operations Facade sees.

use thiserror::Error;

/// Top-level error kind returned by the four public operations (§7).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed at stage {stage_index} ({path}): {message}")]
    Validation {
        stage_index: usize,
        path: String,
        message: String,
    },

    #[error("command {0:?} is not in the allow-list")]
    CommandNotAllowed(String),

    #[error("command {command} exited with status {exit_code}: {stderr_tail}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr_tail: String,
    },

    #[error("tool {tool} on server {server} reported an error: {message}")]
    ToolInvocation {
        server: String,
        tool: String,
        message: String,
    },

    #[error("transport error talking to tool server {server}: {message}")]
    ToolTransport { server: String, message: String },

    #[error("buffer store exceeded its {limit_bytes}-byte limit for this invocation")]
    BufferLimitExceeded { limit_bytes: usize },

    #[error("for-each stage exceeded the {limit} item fan-out limit")]
    ForEachLimitExceeded { limit: usize },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("no runtime configured: {0} is unset, tool servers are unreachable")]
    NoRuntimeConfigured(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("stage input exceeded the {limit_bytes}-byte cap before streaming")]
    StageInputTooLarge { limit_bytes: usize },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Stable kind tag, used by diagnostics and by transports that want
    /// to map kinds onto their own wire error codes without parsing
    /// `Display` text.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "ValidationError",
            EngineError::CommandNotAllowed(_) => "CommandNotAllowed",
            EngineError::CommandFailed { .. } => "CommandFailed",
            EngineError::ToolInvocation { .. } => "ToolInvocationError",
            EngineError::ToolTransport { .. } => "ToolTransportError",
            EngineError::BufferLimitExceeded { .. } => "BufferLimitExceeded",
            EngineError::ForEachLimitExceeded { .. } => "ForEachLimitExceeded",
            EngineError::Cancelled => "Cancelled",
            EngineError::NoRuntimeConfigured(_) => "NoRuntimeConfigured",
            EngineError::NotFound(_) => "NotFound",
            EngineError::StageInputTooLarge { .. } => "StageInputTooLarge",
            EngineError::Configuration(_) => "ConfigurationError",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
