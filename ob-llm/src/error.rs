use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Provider error bodies are clipped to this many characters in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl LlmError {
    pub(crate) fn status(provider: &'static str, status: u16, body: &str) -> Self {
        Self::Status {
            provider,
            status,
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        }
    }

    /// Rate limits, provider overload and timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_clip_the_body_and_classify() {
        let err = LlmError::status("openai", 429, &"x".repeat(2000));
        assert!(err.is_transient());
        let LlmError::Status { body, .. } = &err else {
            panic!("expected status error");
        };
        assert_eq!(body.len(), MAX_ERROR_BODY_CHARS);

        assert!(!LlmError::status("anthropic", 400, "bad tool schema").is_transient());
        assert!(LlmError::Timeout("deadline".to_string()).is_transient());
    }
}
