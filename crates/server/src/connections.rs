//! Named connections loaded from a YAML file.
//!
//! The file never holds secret values. Each credential names the environment
//! variable it is read from at startup:
//!
//! ```yaml
//! default:
//!   base_url: https://api.example.com
//! connections:
//!   shop:
//!     base_url: https://shop.example.com/api
//!     headers:
//!       x-client: stepflow
//!     auth:
//!       type: bearer
//!       token_env: SHOP_TOKEN
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use stepflow_engine::{AuthCredentials, HttpConnectionClient, StaticConnectionResolver};

use crate::error::{AppError, AppResult};

/// Contents of a connections file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionsFile {
    /// Connection used by workflows without a `connection_id`.
    #[serde(default)]
    pub default: Option<ConnectionSpec>,

    /// Connections by id.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSpec>,
}

/// One connection as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSpec {
    #[serde(default)]
    pub base_url: Option<String>,

    /// Headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub auth: AuthSpec,
}

/// Credential reference. Secret parts are environment variable names.
#[derive(Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum AuthSpec {
    #[default]
    None,
    Bearer {
        token_env: String,
    },
    Basic {
        username: String,
        password_env: String,
    },
    ApiKey {
        header: String,
        value_env: String,
    },
}

impl AuthSpec {
    fn resolve<F>(&self, id: &str, lookup: &F) -> AppResult<AuthCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |var: &str| {
            lookup(var).filter(|v| !v.is_empty()).ok_or_else(|| {
                AppError::Config(format!(
                    "connection '{id}': environment variable {var} is not set"
                ))
            })
        };
        Ok(match self {
            AuthSpec::None => AuthCredentials::None,
            AuthSpec::Bearer { token_env } => AuthCredentials::Bearer(secret(token_env)?),
            AuthSpec::Basic {
                username,
                password_env,
            } => AuthCredentials::Basic(username.clone(), secret(password_env)?),
            AuthSpec::ApiKey { header, value_env } => {
                AuthCredentials::ApiKey(header.clone(), secret(value_env)?)
            }
        })
    }
}

impl ConnectionSpec {
    fn build<F>(&self, id: &str, lookup: &F) -> AppResult<HttpConnectionClient>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth = self.auth.resolve(id, lookup)?;
        let client = self
            .headers
            .iter()
            .fold(HttpConnectionClient::new(self.base_url.clone(), auth), |client, (name, value)| {
                client.with_default_header(name.as_str(), value.as_str())
            });
        Ok(client)
    }
}

impl ConnectionsFile {
    pub fn from_yaml(source: &str) -> AppResult<Self> {
        serde_yaml::from_str(source)
            .map_err(|e| AppError::Config(format!("invalid connections file: {e}")))
    }

    /// Build a resolver, reading secrets through `lookup`.
    pub fn into_resolver<F>(self, lookup: F) -> AppResult<StaticConnectionResolver>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolver = match &self.default {
            Some(spec) => {
                StaticConnectionResolver::with_default(Arc::new(spec.build("default", &lookup)?))
            }
            None => StaticConnectionResolver::new(),
        };
        for (id, spec) in &self.connections {
            let client = spec.build(id, &lookup)?;
            tracing::debug!(connection = %id, auth = client_scheme(spec), "Registered connection");
            resolver.insert(id.clone(), Arc::new(client));
        }
        Ok(resolver)
    }
}

fn client_scheme(spec: &ConnectionSpec) -> &'static str {
    match spec.auth {
        AuthSpec::None => "none",
        AuthSpec::Bearer { .. } => "bearer",
        AuthSpec::Basic { .. } => "basic",
        AuthSpec::ApiKey { .. } => "api_key",
    }
}

/// Load connections from `path`, or an anonymous default when no file is
/// configured.
pub async fn load_connections(path: Option<&Path>) -> AppResult<StaticConnectionResolver> {
    let Some(path) = path else {
        tracing::info!("No connections file configured, using anonymous default connection");
        return Ok(StaticConnectionResolver::new());
    };
    let source = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::Config(format!("cannot read connections file {}: {e}", path.display()))
    })?;
    let resolver = ConnectionsFile::from_yaml(&source)?.into_resolver(|var| std::env::var(var).ok())?;
    tracing::info!(path = %path.display(), connections = resolver.len(), "Loaded connections");
    Ok(resolver)
}
