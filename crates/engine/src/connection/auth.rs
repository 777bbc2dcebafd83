//! Resolved connection credentials.

use std::fmt;

/// Credentials bound to a connection. Values are already decrypted.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthCredentials {
    /// Bearer token.
    Bearer(String),
    /// Basic auth (username, password).
    Basic(String, String),
    /// API key (header name, value).
    ApiKey(String, String),
    /// No authentication.
    None,
}

impl AuthCredentials {
    /// Apply credentials to a reqwest request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthCredentials::Bearer(token) => request.bearer_auth(token),
            AuthCredentials::Basic(username, password) => {
                request.basic_auth(username, Some(password))
            }
            AuthCredentials::ApiKey(header, value) => {
                request.header(header.as_str(), value.as_str())
            }
            AuthCredentials::None => request,
        }
    }

    /// Secret values that must be scrubbed from any diagnostic text.
    pub fn secret_values(&self) -> Vec<&str> {
        match self {
            AuthCredentials::Bearer(token) => vec![token.as_str()],
            AuthCredentials::Basic(_, password) => vec![password.as_str()],
            AuthCredentials::ApiKey(_, value) => vec![value.as_str()],
            AuthCredentials::None => Vec::new(),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            AuthCredentials::Bearer(_) => "bearer",
            AuthCredentials::Basic(_, _) => "basic",
            AuthCredentials::ApiKey(_, _) => "api_key",
            AuthCredentials::None => "none",
        }
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthCredentials::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            AuthCredentials::Basic(username, _) => write!(f, "Basic({username:?}, [REDACTED])"),
            AuthCredentials::ApiKey(header, _) => write!(f, "ApiKey({header:?}, [REDACTED])"),
            AuthCredentials::None => f.write_str("None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = AuthCredentials::Basic("svc".into(), "hunter2".into());
        let debug = format!("{creds:?}");
        assert!(debug.contains("svc"));
        assert!(!debug.contains("hunter2"));

        let creds = AuthCredentials::Bearer("tok-123".into());
        assert!(!format!("{creds:?}").contains("tok-123"));
    }

    #[test]
    fn test_secret_values() {
        assert_eq!(
            AuthCredentials::ApiKey("X-Key".into(), "k1".into()).secret_values(),
            vec!["k1"]
        );
        assert!(AuthCredentials::None.secret_values().is_empty());
    }
}
