// crates/core/src/error.rs
use thiserror::Error;

/// Reasons a research submission is rejected before any job exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("query is required")]
    EmptyQuery,

    #[error("invalid model: {0:?}")]
    InvalidModel(String),

    #[error("max_turns must be positive")]
    NonPositiveMaxTurns,

    #[error("max_turns must not exceed {max}")]
    MaxTurnsTooLarge { max: u32 },
}

/// Errors raised when a client-supplied name or path is unsafe to touch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("directory name must not be empty")]
    EmptyDirName,

    #[error("directory name must not contain {0:?}")]
    ForbiddenInDirName(&'static str),

    #[error("directory name must start with {prefix:?}")]
    MissingPrefix { prefix: &'static str },

    #[error("file path must not be empty")]
    EmptyFilePath,

    #[error("file path must not contain \"..\"")]
    ParentTraversal,

    #[error("file path must not be absolute")]
    AbsoluteFilePath,

    #[error("file path escapes base directory")]
    EscapesBase,
}
