//! Connection and pool settings for the PostgreSQL execution store.

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::time::Duration;

/// PostgreSQL settings loaded from environment variables.
///
/// Environment variables are prefixed with `POSTGRES_`:
/// - `POSTGRES_URL`: Full connection URL; when set the fields below are ignored
/// - `POSTGRES_HOST`, `POSTGRES_PORT`, `POSTGRES_USER`, `POSTGRES_PASSWORD`,
///   `POSTGRES_DATABASE`: Connection fields (defaults: localhost, 5432,
///   stepflow, empty, stepflow)
/// - `POSTGRES_WRITERS`: Executions expected to run at once (default: 16)
/// - `POSTGRES_READERS`: Connections kept for status and history reads (default: 4)
/// - `POSTGRES_ACQUIRE_TIMEOUT_MS`: Wait for a free connection (default: 2000)
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_name")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_name")]
    pub database: String,

    /// Each running execution holds at most one connection, for the length
    /// of a snapshot write.
    #[serde(default = "default_writers")]
    pub writers: u32,

    /// Connections left for API reads while every writer is busy.
    #[serde(default = "default_readers")]
    pub readers: u32,

    /// Kept short: a runner retries a final write that timed out.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_name() -> String {
    "stepflow".to_string()
}

fn default_writers() -> u32 {
    16
}

fn default_readers() -> u32 {
    4
}

fn default_acquire_timeout_ms() -> u64 {
    2000
}

impl DatabaseConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("POSTGRES_").from_env::<DatabaseConfig>()
    }

    /// Upper bound of the pool: one connection per writer plus the readers.
    pub fn pool_size(&self) -> u32 {
        self.writers.max(1).saturating_add(self.readers.max(1))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Connection options from `url` when set, otherwise from the fields.
    ///
    /// A malformed URL is reported without echoing it, since it may carry
    /// the password.
    pub fn connect_options(&self) -> anyhow::Result<PgConnectOptions> {
        match &self.url {
            Some(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|_| anyhow::anyhow!("POSTGRES_URL is not a valid PostgreSQL connection URL")),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.database)),
        }
    }
}

// Neither the password nor a URL that may embed it is printed.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("writers", &self.writers)
            .field("readers", &self.readers)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .finish()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            user: default_name(),
            password: String::new(),
            database: default_name(),
            writers: default_writers(),
            readers: default_readers(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}
