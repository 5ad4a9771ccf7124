use thiserror::Error;

pub type FoldkeysResult<T> = Result<T, FoldkeysError>;

/// Errors surfaced by configuration loading and other process-level setup
#[derive(Debug, Error)]
pub enum FoldkeysError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
