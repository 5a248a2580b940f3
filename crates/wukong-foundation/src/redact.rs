//! Secret redaction for error messages (spec §4.4.4, §7, §8 property 6).
//!
//! Applied by the tool executor to every message surfaced from a thrown
//! exception, and by the logging collaborator (spec §7) before any error
//! string reaches a log sink.

use regex::Regex;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)bearer\s+[a-z0-9._\-]+").unwrap(),
            Regex::new(r"(?i)api[_-]?key\s*[=:]\s*\S+").unwrap(),
            Regex::new(r"(?i)token\s*[=:]\s*\S+").unwrap(),
            Regex::new(r"(?i)password\s*[=:]\s*\S+").unwrap(),
            // Home-directory paths: /home/<user>/... or /Users/<user>/...
            Regex::new(r"(?i)(/home/|/Users/)[^/\s]+").unwrap(),
            // Long alphanumeric runs that look like secrets (>=32 chars).
            Regex::new(r"[A-Za-z0-9]{32,}").unwrap(),
        ]
    })
}

/// Redact likely secrets from `message` and truncate to `max_len` bytes.
pub fn sanitize(message: &str, max_len: usize) -> String {
    let mut redacted = message.to_string();
    for pattern in patterns() {
        redacted = pattern.replace_all(&redacted, "[REDACTED]").into_owned();
    }
    truncate(&redacted, max_len)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    // Respect UTF-8 boundaries while truncating.
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_tokens() {
        let out = sanitize("auth failed: Bearer abcDEF123456", 500);
        assert!(!out.contains("Bearer abcDEF123456"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn redacts_api_key_and_password_assignments() {
        let out = sanitize("request failed api_key=sk-xyz789 password=hunter2", 500);
        assert!(!out.contains("sk-xyz789"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn redacts_home_directory_paths() {
        let out = sanitize("cannot read /home/alice/.ssh/id_rsa", 500);
        assert!(!out.contains("/home/alice"));
    }

    #[test]
    fn redacts_long_alphanumeric_runs() {
        let out = sanitize(
            "leaked secret: 4f8a9c2b7e1d3a5f6b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e",
            500,
        );
        assert!(!out.contains("4f8a9c2b7e1d3a5f6b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e"));
    }

    #[test]
    fn truncates_to_max_len() {
        let long = "x".repeat(1000);
        let out = sanitize(&long, 500);
        assert!(out.len() <= 503);
    }

    #[test]
    fn round_trip_never_contains_marker_strings() {
        let msg = "Bearer abc api_key=xyz token=123 password=secret";
        let out = sanitize(msg, 500);
        assert!(!out.contains("Bearer "));
        assert!(!out.contains("api_key="));
        assert!(!out.contains("password="));
    }
}
