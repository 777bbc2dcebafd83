//! reqwest-backed connection client.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{
    join_url, AuthCredentials, ConnectionClient, ConnectionError, HttpRequest, HttpResponse,
    RequestBody, RequestTarget,
};
use crate::sanitize::redact_secrets;

/// HTTP client bound to an optional base URL and credentials.
#[derive(Debug, Clone)]
pub struct HttpConnectionClient {
    client: reqwest::Client,
    base_url: Option<String>,
    auth: AuthCredentials,
    default_headers: Vec<(String, String)>,
}

impl HttpConnectionClient {
    /// Create a client with its own reqwest pool.
    pub fn new(base_url: Option<String>, auth: AuthCredentials) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self::with_client(client, base_url, auth)
    }

    /// Create a client around an existing reqwest client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: Option<String>,
        auth: AuthCredentials,
    ) -> Self {
        Self {
            client,
            base_url,
            auth,
            default_headers: Vec::new(),
        }
    }

    /// Unauthenticated client without a base URL.
    pub fn anonymous() -> Self {
        Self::new(None, AuthCredentials::None)
    }

    /// Add a header sent with every request.
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    fn url_for(&self, target: &RequestTarget) -> Result<String, ConnectionError> {
        match target {
            RequestTarget::Url(url) => Ok(url.clone()),
            RequestTarget::Path(path) => self
                .base_url
                .as_deref()
                .map(|base| join_url(base, path))
                .ok_or_else(|| ConnectionError::NoBaseUrl(path.clone())),
        }
    }

    /// Describe a reqwest error without the URL (which may carry query
    /// secrets) and without credential values.
    fn describe(&self, e: reqwest::Error) -> ConnectionError {
        if e.is_timeout() {
            return ConnectionError::Timeout;
        }
        let e = e.without_url();
        // The reqwest display hides the cause chain; append it.
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        ConnectionError::Network(redact_secrets(&message, &self.auth.secret_values()))
    }
}

#[async_trait]
impl ConnectionClient for HttpConnectionClient {
    fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ConnectionError> {
        let url = self.url_for(&request.target)?;
        let method: reqwest::Method = request.method.into();
        debug!(method = %request.method.as_str(), auth = self.auth.scheme(), "Sending HTTP request");

        let mut builder = self.client.request(method, &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in self.default_headers.iter().chain(request.headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            Some(RequestBody::Json(json)) => builder.json(&json),
            Some(RequestBody::Text(text)) => builder.body(text),
            None => builder,
        };
        builder = self.auth.apply_to_request(builder);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| self.describe(e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.describe(e))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
