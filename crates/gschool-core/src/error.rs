use thiserror::Error;

/// Validation failures of admin operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{0} required")]
    MissingField(&'static str),

    #[error("invalid scene type: {0} (expected allowed or blocked)")]
    InvalidSceneType(String),

    #[error("scene not found: {0}")]
    SceneNotFound(String),

    #[error("invalid toggle key: {0} (expected focus_mode or paused)")]
    InvalidToggleKey(String),

    #[error("invalid tab action: {0} (expected restore_tabs or close_tabs)")]
    InvalidTabAction(String),

    #[error("invalid exam action: {0} (expected start or end)")]
    InvalidExamAction(String),

    #[error("invalid import payload: expected \"scene\" or \"scenes\"")]
    InvalidImport,

    #[error("no active attention check")]
    NoActiveCheck,

    #[error("poll not found: {0}")]
    PollNotFound(String),
}
