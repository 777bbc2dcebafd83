//! Fixed set of connections registered at startup.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectionClient, ConnectionError, ConnectionResolver, HttpConnectionClient};

/// Resolver over a fixed map of named connections plus a default.
#[derive(Clone)]
pub struct StaticConnectionResolver {
    default: Arc<dyn ConnectionClient>,
    named: HashMap<String, Arc<dyn ConnectionClient>>,
}

impl StaticConnectionResolver {
    /// Resolver whose default connection is an unauthenticated client.
    pub fn new() -> Self {
        Self::with_default(Arc::new(HttpConnectionClient::anonymous()))
    }

    pub fn with_default(default: Arc<dyn ConnectionClient>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Register a named connection.
    pub fn with_connection(mut self, id: impl Into<String>, client: Arc<dyn ConnectionClient>) -> Self {
        self.named.insert(id.into(), client);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, client: Arc<dyn ConnectionClient>) {
        self.named.insert(id.into(), client);
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }
}

impl Default for StaticConnectionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionResolver for StaticConnectionResolver {
    fn resolve(&self, connection_id: Option<&str>) -> Result<Arc<dyn ConnectionClient>, ConnectionError> {
        match connection_id {
            None => Ok(self.default.clone()),
            Some(id) => self
                .named
                .get(id)
                .cloned()
                .ok_or_else(|| ConnectionError::UnknownConnection(id.to_string())),
        }
    }
}
