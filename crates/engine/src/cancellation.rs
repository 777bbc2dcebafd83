//! Per-execution cancellation tokens.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Registry of cancellation tokens for live executions.
///
/// Tokens are handed to the runner, which checks them at every step boundary
/// and threads them into in-flight HTTP calls. Cancelling is signal-only; the
/// runner decides when the execution actually settles.
#[derive(Debug, Default)]
pub struct CancellationController {
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for an execution, created on first use.
    pub fn token(&self, execution_id: Uuid) -> CancellationToken {
        if let Some(token) = self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
        {
            return token.clone();
        }
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(execution_id)
            .or_default()
            .clone()
    }

    /// Signal cancellation. Returns false if no token is registered.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the token once the execution has settled.
    pub fn release(&self, execution_id: Uuid) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&execution_id);
    }

    /// Cancel every registered execution. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }
}
