//! Sensitive data redaction.
//!
//! Step outputs, response headers and error messages pass through here before
//! they are persisted or logged, so credential material supplied by a
//! connection never reaches the execution history.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Redaction placeholder
pub const REDACTED: &str = "[REDACTED]";

/// Keys that indicate sensitive data (lowercase for comparison)
static SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "bearer",
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "auth_token",
    "authorization",
    "credential",
    "private_key",
    "privatekey",
    "client_secret",
    "connection_string",
    "passphrase",
    "id_token",
    "session_key",
    "cookie",
];

static SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-access-token",
    "www-authenticate",
];

static AUTH_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(bearer|basic|token)\s+[A-Za-z0-9\-._~+/]+=*")
        .unwrap_or_else(|e| panic!("invalid auth scheme pattern: {e}"))
});

static JWT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*")
        .unwrap_or_else(|e| panic!("invalid jwt pattern: {e}"))
});

static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(password|passwd|secret|token|api_key|apikey|access_token|client_secret|key)=([^&\s]+)",
    )
    .unwrap_or_else(|e| panic!("invalid key=value pattern: {e}"))
});

static PRIVATE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)-----BEGIN [A-Z ]*PRIVATE KEY-----.*?-----END [A-Z ]*PRIVATE KEY-----")
        .unwrap_or_else(|e| panic!("invalid private key pattern: {e}"))
});

static LONG_OPAQUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9+/=]{40,}").unwrap_or_else(|e| panic!("invalid opaque pattern: {e}"))
});

/// Check if a key indicates sensitive data.
pub fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase().replace('-', "_");
    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| key_lower.contains(sensitive))
}

/// Check if a string value looks like sensitive data.
fn is_sensitive_value(value: &str) -> bool {
    let lower = value.to_lowercase();
    if lower.starts_with("bearer ") || lower.starts_with("basic ") {
        return true;
    }

    // JWT (header.payload.signature)
    if value.starts_with("eyJ")
        && value.chars().filter(|&c| c == '.').count() == 2
        && value.len() > 50
    {
        return true;
    }

    if value.contains("-----BEGIN") && value.contains("PRIVATE KEY-----") {
        return true;
    }

    // Long opaque strings are most likely API keys
    value.len() >= 40
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=')
}

/// Recursively sanitize sensitive data from a JSON value.
///
/// Values under sensitive keys and strings that look like credentials are
/// replaced with `[REDACTED]`. Returns a new value.
pub fn sanitize_sensitive_data(value: &Value) -> Value {
    sanitize_recursive(value, 0, 20)
}

fn sanitize_recursive(value: &Value, depth: usize, max_depth: usize) -> Value {
    if depth >= max_depth {
        return value.clone();
    }

    match value {
        Value::Object(map) => {
            let mut result = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) {
                    result.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    result.insert(key.clone(), sanitize_recursive(val, depth + 1, max_depth));
                }
            }
            Value::Object(result)
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|item| sanitize_recursive(item, depth + 1, max_depth))
                .collect(),
        ),
        Value::String(s) if is_sensitive_value(s) => Value::String(REDACTED.to_string()),
        _ => value.clone(),
    }
}

/// Sanitize response headers before they become step output.
pub fn sanitize_headers(headers: &Map<String, Value>) -> Map<String, Value> {
    headers
        .iter()
        .map(|(key, value)| {
            let lower = key.to_lowercase();
            if SENSITIVE_HEADERS.contains(&lower.as_str()) || is_sensitive_key(key) {
                (key.clone(), Value::String(REDACTED.to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

/// Redact credential-looking fragments embedded in free text.
///
/// Used for error messages, which may quote request lines, upstream bodies
/// or library diagnostics.
pub fn redact_text(text: &str) -> String {
    let text = PRIVATE_KEY.replace_all(text, REDACTED);
    let text = AUTH_SCHEME.replace_all(&text, format!("$1 {REDACTED}").as_str());
    let text = JWT.replace_all(&text, REDACTED);
    let text = KEY_VALUE.replace_all(&text, format!("$1={REDACTED}").as_str());
    LONG_OPAQUE.replace_all(&text, REDACTED).into_owned()
}

/// Replace every occurrence of known secret literals, then apply
/// [`redact_text`].
pub fn redact_secrets(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, REDACTED);
    }
    redact_text(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_password_key() {
        let data = json!({"user": "admin", "password": "secret123"});
        let result = sanitize_sensitive_data(&data);
        assert_eq!(result["user"], "admin");
        assert_eq!(result["password"], "[REDACTED]");
    }

    #[test]
    fn test_sanitize_bearer_value() {
        let data = json!({"header": "Bearer xyz123abc456"});
        let result = sanitize_sensitive_data(&data);
        assert_eq!(result["header"], "[REDACTED]");
    }

    #[test]
    fn test_sanitize_nested_and_arrays() {
        let data = json!({
            "config": {"username": "admin", "api_key": "k-123"},
            "items": [{"name": "a", "token": "t1"}]
        });
        let result = sanitize_sensitive_data(&data);
        assert_eq!(result["config"]["username"], "admin");
        assert_eq!(result["config"]["api_key"], "[REDACTED]");
        assert_eq!(result["items"][0]["name"], "a");
        assert_eq!(result["items"][0]["token"], "[REDACTED]");
    }

    #[test]
    fn test_non_sensitive_preserved() {
        let data = json!({"name": "test", "count": 42, "enabled": true, "tags": ["a", "b"]});
        assert_eq!(sanitize_sensitive_data(&data), data);
    }

    #[test]
    fn test_sanitize_headers() {
        let mut headers = Map::new();
        headers.insert("Content-Type".into(), json!("application/json"));
        headers.insert("Set-Cookie".into(), json!("session=abc"));
        headers.insert("X-Api-Key".into(), json!("k"));
        let result = sanitize_headers(&headers);
        assert_eq!(result["Content-Type"], "application/json");
        assert_eq!(result["Set-Cookie"], "[REDACTED]");
        assert_eq!(result["X-Api-Key"], "[REDACTED]");
    }

    #[test]
    fn test_redact_text_auth_schemes() {
        let out = redact_text("upstream rejected Authorization: Bearer abc.def-123");
        assert!(!out.contains("abc.def-123"));
        assert!(out.contains("Bearer [REDACTED]"));

        let out = redact_text("basic dXNlcjpwYXNz= was refused");
        assert!(!out.contains("dXNlcjpwYXNz"));
    }

    #[test]
    fn test_redact_text_query_secrets() {
        let out = redact_text("GET /v1/items?api_key=s3cr3t&page=2 failed");
        assert!(!out.contains("s3cr3t"));
        assert!(out.contains("page=2"));
    }

    #[test]
    fn test_redact_text_keeps_plain_messages() {
        let msg = "step 'fetch' references unknown field 'data.x'";
        assert_eq!(redact_text(msg), msg);
    }

    #[test]
    fn test_redact_secrets_literal() {
        let out = redact_secrets("connection to host failed: hunter2 rejected", &["hunter2"]);
        assert_eq!(out, "connection to host failed: [REDACTED] rejected");
    }
}
