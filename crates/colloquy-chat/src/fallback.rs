//! Fixed replies substituted for failed model calls.

use colloquy_llm::LlmError;

pub const DEFAULT_FALLBACK: &str =
    "I apologize, I'm having trouble responding right now. Please try again.";
pub const RATE_LIMIT_FALLBACK: &str =
    "I'm receiving too many requests. Please wait a moment and try again.";
pub const TIMEOUT_FALLBACK: &str =
    "The request took too long. Please try again with a shorter message.";
pub const STT_FAILED_FALLBACK: &str =
    "I couldn't understand the audio. Please try speaking more clearly.";

/// User message stored when a recording cannot be transcribed.
pub const STT_FAILED_PLACEHOLDER: &str = "[Audio message - transcription failed]";

/// Category of a failed AI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Default,
    RateLimit,
    Timeout,
    SttFailed,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::Default => "default",
            FallbackKind::RateLimit => "rate_limit",
            FallbackKind::Timeout => "timeout",
            FallbackKind::SttFailed => "stt_failed",
        }
    }

    /// The reply persisted in place of the model's answer.
    pub fn message(&self) -> &'static str {
        match self {
            FallbackKind::Default => DEFAULT_FALLBACK,
            FallbackKind::RateLimit => RATE_LIMIT_FALLBACK,
            FallbackKind::Timeout => TIMEOUT_FALLBACK,
            FallbackKind::SttFailed => STT_FAILED_FALLBACK,
        }
    }

    /// Classify an error description. `rate_limit` takes precedence over `timeout`.
    pub fn classify(description: &str) -> Self {
        let lower = description.to_lowercase();
        if lower.contains("rate_limit") {
            FallbackKind::RateLimit
        } else if lower.contains("timeout") {
            FallbackKind::Timeout
        } else {
            FallbackKind::Default
        }
    }

    /// Classify a model error by variant, then by description.
    pub fn classify_llm(err: &LlmError) -> Self {
        if err.is_rate_limit() {
            FallbackKind::RateLimit
        } else if err.is_timeout() {
            FallbackKind::Timeout
        } else {
            Self::classify(&err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_substrings_case_insensitive() {
        assert_eq!(
            FallbackKind::classify("Error code: 429 - RATE_LIMIT_exceeded"),
            FallbackKind::RateLimit
        );
        assert_eq!(FallbackKind::classify("Read Timeout after 60s"), FallbackKind::Timeout);
        assert_eq!(FallbackKind::classify("invalid api key"), FallbackKind::Default);
        assert_eq!(FallbackKind::classify(""), FallbackKind::Default);
    }

    #[test]
    fn test_rate_limit_wins_over_timeout() {
        assert_eq!(
            FallbackKind::classify("rate_limit reached, timeout pending"),
            FallbackKind::RateLimit
        );
    }

    #[test]
    fn test_classify_llm_structured() {
        let err = LlmError::Api {
            status: 429,
            message: "Too Many Requests".to_string(),
        };
        assert_eq!(FallbackKind::classify_llm(&err), FallbackKind::RateLimit);
        assert_eq!(
            FallbackKind::classify_llm(&LlmError::Timeout("idle".into())),
            FallbackKind::Timeout
        );
        assert_eq!(
            FallbackKind::classify_llm(&LlmError::Stream("rate_limit_exceeded: slow".into())),
            FallbackKind::RateLimit
        );
        assert_eq!(
            FallbackKind::classify_llm(&LlmError::Http("connection refused".into())),
            FallbackKind::Default
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(FallbackKind::RateLimit.message(), RATE_LIMIT_FALLBACK);
        assert_eq!(FallbackKind::SttFailed.as_str(), "stt_failed");
        assert_eq!(FallbackKind::Default.message(), DEFAULT_FALLBACK);
    }
}
