//! Outbound HTTP through pre-authenticated connections.
//!
//! The engine never handles raw credentials. A [`ConnectionResolver`] hands
//! it a [`ConnectionClient`] already bound to a base URL and authentication,
//! and every API call step goes through that client.

mod auth;
mod http;
mod resolver;

pub use auth::AuthCredentials;
pub use http::HttpConnectionClient;
pub use resolver::StaticConnectionResolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)] // HTTP methods are conventionally uppercase
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::GET),
            "POST" => Ok(HttpMethod::POST),
            "PUT" => Ok(HttpMethod::PUT),
            "PATCH" => Ok(HttpMethod::PATCH),
            "DELETE" => Ok(HttpMethod::DELETE),
            "HEAD" => Ok(HttpMethod::HEAD),
            "OPTIONS" => Ok(HttpMethod::OPTIONS),
            other => Err(format!("unsupported HTTP method '{other}'")),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::POST => reqwest::Method::POST,
            HttpMethod::PUT => reqwest::Method::PUT,
            HttpMethod::PATCH => reqwest::Method::PATCH,
            HttpMethod::DELETE => reqwest::Method::DELETE,
            HttpMethod::HEAD => reqwest::Method::HEAD,
            HttpMethod::OPTIONS => reqwest::Method::OPTIONS,
        }
    }
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// Absolute URL.
    Url(String),
    /// Path relative to the connection's base URL.
    Path(String),
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
}

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub target: RequestTarget,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, target: RequestTarget) -> Self {
        Self {
            method,
            target,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }
}

/// A received response. The body is left unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Connection errors. Messages never carry credential values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// No connection is registered under this id.
    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    /// A relative path was requested on a connection without a base URL.
    #[error("connection has no base URL for relative path '{0}'")]
    NoBaseUrl(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport failure.
    #[error("{0}")]
    Network(String),

    /// The client's own timeout elapsed.
    #[error("request timed out")]
    Timeout,
}

/// An HTTP client bound to a base URL and resolved credentials.
#[async_trait]
pub trait ConnectionClient: Send + Sync {
    /// Base URL that relative paths are joined to.
    fn base_url(&self) -> Option<&str>;

    /// Send a request and return the raw response. Non-2xx statuses are
    /// returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ConnectionError>;
}

/// Supplies connection clients by id.
pub trait ConnectionResolver: Send + Sync {
    /// Resolve a connection. `None` selects the default connection.
    fn resolve(&self, connection_id: Option<&str>) -> Result<Arc<dyn ConnectionClient>, ConnectionError>;
}

/// Join a base URL and a relative path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
