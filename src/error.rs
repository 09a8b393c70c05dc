use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovlensError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LCOV parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Cannot demangle '{0}'")]
    Demangle(String),

    #[error("Failed to load demangler: {0}")]
    DemanglerLoad(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CovlensError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        CovlensError::Parse {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CovlensError>;
