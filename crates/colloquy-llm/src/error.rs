//! Error types for language-model calls.

/// Errors from a chat-completion backend.
///
/// Display text keeps the words `rate_limit` and `timeout` for throttling
/// and deadline failures, so callers classifying by description agree with
/// [`LlmError::is_rate_limit`] and [`LlmError::is_timeout`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error ({status}{}): {message}", rate_limit_tag(.status))]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
}

fn rate_limit_tag(status: &u16) -> &'static str {
    if *status == 429 {
        ", rate_limit"
    } else {
        ""
    }
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::Api { status: 429, .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LlmError::Timeout(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else if err.is_decode() {
            LlmError::Parse(err.to_string())
        } else {
            LlmError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_display_and_flag() {
        let err = LlmError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(err.is_rate_limit());
        assert_eq!(err.to_string(), "API error (429, rate_limit): slow down");
    }

    #[test]
    fn test_other_status_display() {
        let err = LlmError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(!err.is_rate_limit());
        assert_eq!(err.to_string(), "API error (500): boom");
    }

    #[test]
    fn test_timeout_display() {
        let err = LlmError::Timeout("no data for 60s".to_string());
        assert!(err.is_timeout());
        assert!(err.to_string().to_lowercase().contains("timeout"));
    }

    #[test]
    fn test_from_serde_json() {
        let err: LlmError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, LlmError::Parse(_)));
    }
}
