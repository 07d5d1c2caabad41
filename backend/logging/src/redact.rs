//! Log Redaction Layer
//!
//! Scrubs bearer tokens, token query parameters and API keys from strings
//! prior to logging.

use regex::Regex;
use std::sync::LazyLock;

static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[a-z0-9\-._~+/]+=*").expect("valid bearer regex")
});
static TOKEN_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:access_?token|api_?key|token)["']?\s*[=:]\s*["']?)[^\s"'&,}]+"#)
        .expect("valid token param regex")
});
static API_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-[a-zA-Z0-9]{32,}").expect("valid api key regex"));

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = BEARER_RE.replace_all(input, "Bearer [REDACTED_TOKEN]");
    let redacted = TOKEN_PARAM_RE.replace_all(&redacted, "${1}[REDACTED_TOKEN]");
    API_KEY_RE.replace_all(&redacted, "[REDACTED_TOKEN]").into_owned()
}
