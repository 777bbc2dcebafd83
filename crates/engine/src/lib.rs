//! Stepflow workflow execution engine.
//!
//! Runs user-authored workflows (ordered lists of typed steps) against live
//! HTTP APIs. This crate provides:
//! - The execution orchestrator with timeouts, cancellation and retries
//! - Step executors: API call, transform, condition
//! - `{{ path }}` template resolution over prior step outputs
//! - A bounded condition/expression language
//! - Execution stores (in-memory and PostgreSQL)

pub mod cancellation;
pub mod condition;
pub mod config;
pub mod connection;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expression;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod record;
pub mod result_ext;
pub mod retry;
pub mod sanitize;
pub mod store;
pub mod template;
pub mod workflow_source;

pub use config::{ConditionPolicy, EngineConfig};
pub use connection::{
    AuthCredentials, ConnectionClient, ConnectionError, ConnectionResolver, HttpConnectionClient,
    StaticConnectionResolver,
};
pub use context::ExecutionContext;
pub use definition::{RetryOverride, StepDefinition, StepType, WorkflowDefinition};
pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorInfo, ErrorKind, StepError, ValidationError};
pub use progress::ExecutionProgress;
pub use record::{ExecutionRecord, ExecutionStatus, StepResult, StepStatus};
pub use retry::RetryPolicy;
pub use store::{ExecutionStore, InMemoryExecutionStore, PgExecutionStore, StoreError};
pub use workflow_source::{InMemoryWorkflowSource, WorkflowSource};
