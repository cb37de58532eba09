use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid tool configuration: {0}")]
    InvalidConfig(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        Self::ExecutionFailed(e.to_string())
    }
}
