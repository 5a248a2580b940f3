//! Error types shared by every layer of the runtime.
//!
//! All errors funnel through this one enum so that the step executor and
//! agent loop (wukong-agent) can pattern-match on a closed set when deciding
//! `canRetry` / `shouldContinue` semantics (spec §7).

use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The runtime's error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Validation — retryable at the decision level (spec §7)
    // ------------------------------------------------------------------
    #[error("validation error: {0}")]
    Validation(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    // ------------------------------------------------------------------
    // Transient external — recovered locally by retry (spec §7)
    // ------------------------------------------------------------------
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transient error: {0}")]
    Transient(String),

    // ------------------------------------------------------------------
    // Tool logic failure
    // ------------------------------------------------------------------
    #[error("tool error: {0}")]
    Tool(String),

    // ------------------------------------------------------------------
    // Fatal loop errors
    // ------------------------------------------------------------------
    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("failed to parse model response: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cache error: {0}")]
    Cache(String),

    // ------------------------------------------------------------------
    // Budget exceeded
    // ------------------------------------------------------------------
    #[error("maximum fork depth exceeded: {0}")]
    ForkDepthExceeded(String),

    #[error("max steps reached")]
    MaxStepsReached,

    #[error("task timeout")]
    TaskTimeout,

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------
    #[error("stopped: {0}")]
    Stopped(String),

    #[error("cancelled")]
    Cancelled,

    // ------------------------------------------------------------------
    // General
    // ------------------------------------------------------------------
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify retryability per the pattern set in spec §4.4.4.
    ///
    /// `message` is checked case-insensitively against the retryable
    /// pattern set; this is used both by the tool executor (on a thrown
    /// exception) and directly here for errors already typed as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation(_) => true,
            Error::Timeout(_) | Error::Transient(_) => true,
            Error::Tool(msg) => classify_retryable_message(msg),
            _ => false,
        }
    }
}

/// The retryable-message pattern set from spec §4.4.4 / §8 property 6.
const RETRYABLE_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "econnrefused",
    "etimedout",
    "enotfound",
    "rate limit",
    "too many requests",
    "502",
    "503",
    "504",
    "temporary",
];

/// Check an error message against the retryable pattern set.
pub fn classify_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_patterns_match_case_insensitively() {
        assert!(classify_retryable_message("Connection reset: ETIMEDOUT"));
        assert!(classify_retryable_message("503 Service Unavailable"));
        assert!(classify_retryable_message("Rate Limit exceeded"));
        assert!(!classify_retryable_message("invalid argument: foo"));
    }

    #[test]
    fn tool_error_retryability_follows_message() {
        let e = Error::Tool("upstream returned 502".to_string());
        assert!(e.is_retryable());
        let e = Error::Tool("malformed request body".to_string());
        assert!(!e.is_retryable());
    }
}
