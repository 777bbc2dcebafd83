//! Application configuration for the Stepflow server.

use serde::Deserialize;
use std::path::PathBuf;

/// Backend used to persist execution records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Records live in process memory and are lost on restart.
    #[default]
    Memory,
    /// Records are stored in PostgreSQL (see [`DatabaseConfig`](super::DatabaseConfig)).
    Postgres,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Postgres => "postgres",
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `STEPFLOW_`:
/// - `STEPFLOW_HOST`: Server bind address (default: "0.0.0.0")
/// - `STEPFLOW_PORT`: Server port (default: 8090)
/// - `STEPFLOW_WORKFLOW_DIR`: Directory holding workflow documents (default: "./workflows")
/// - `STEPFLOW_CONNECTIONS_FILE`: YAML file describing named connections (optional)
/// - `STEPFLOW_STORE`: `memory` or `postgres` (default: memory)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory searched for `<workflow_id>.yaml`, `.yml` or `.json`
    #[serde(default = "default_workflow_dir")]
    pub workflow_dir: PathBuf,

    /// Connections file; without one every workflow uses an anonymous client
    #[serde(default)]
    pub connections_file: Option<PathBuf>,

    /// Execution store backend
    #[serde(default)]
    pub store: StoreKind,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_workflow_dir() -> PathBuf {
    PathBuf::from("./workflows")
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `STEPFLOW_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("STEPFLOW_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workflow_dir: default_workflow_dir(),
            connections_file: None,
            store: StoreKind::default(),
        }
    }
}
