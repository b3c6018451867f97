use std::path::PathBuf;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid score on line {line}: {value:?}")]
    ScoreParse { line: usize, value: String },

    #[error("index {index} out of range for vocabulary of size {size}")]
    IndexOutOfRange { index: usize, size: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hidden state mismatch: {0}")]
    StateMismatch(String),

    #[error("evaluation received no windows")]
    EmptyEvaluation,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
