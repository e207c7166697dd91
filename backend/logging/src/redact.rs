//! Scrubs API keys, bearer tokens and phone numbers before they reach a log.

use std::sync::LazyLock;

use regex::Regex;

static TELEPHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}").unwrap()
});
static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-[a-zA-Z0-9_-]{20,})|(Bearer\s+[a-zA-Z0-9\-._~+/]+=*)").unwrap()
});
static KEY_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(api[_-]?key|token|secret)=([^&\s]+)").unwrap()
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = TELEPHONE_RE.replace_all(input, "[REDACTED_PHONE]");
    let redacted = API_KEY_RE.replace_all(&redacted, "[REDACTED_TOKEN]");
    KEY_PARAM_RE
        .replace_all(&redacted, "$1=[REDACTED_TOKEN]")
        .into_owned()
}
