//! Error types for the chat-completions client.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, OpenAIError>;

/// Chat-completions client errors.
#[derive(Debug, Error)]
pub enum OpenAIError {
    /// Configuration error (missing API key, invalid endpoint)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response from the API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Parse error (invalid JSON, unexpected response shape, refusal)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl OpenAIError {
    /// Whether a request that failed with this error may succeed if sent again.
    ///
    /// Network failures, rate limiting and server-side errors are transient;
    /// everything else is a caller problem and retrying would only burn quota.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Config(_) | Self::Parse(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OpenAIError::Network("reset".into()).is_retryable());
        assert!(OpenAIError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(OpenAIError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!OpenAIError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!OpenAIError::Parse("bad json".into()).is_retryable());
        assert!(!OpenAIError::Config("no key".into()).is_retryable());
    }
}
