//! Error types for workflow execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::connection::ConnectionError;
use crate::expression::ExpressionError;
use crate::store::StoreError;
use crate::template::TemplateError;

/// Classification of every error the engine can record.
///
/// Persisted alongside error messages so that history readers can tell
/// terminal failures from transient ones without parsing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed workflow or step configuration.
    Validation,
    /// A template referenced a missing step, field or wrong type.
    TemplateResolution,
    /// A condition expression could not be evaluated.
    ConditionEvaluation,
    /// A transform mapping failed.
    Transform,
    /// Transport-level failure talking to a remote API.
    Network,
    /// Remote API answered with a server-side error status.
    HttpServer,
    /// Remote API answered with a client-side error status.
    HttpClient,
    /// A single HTTP call exceeded its timeout.
    CallTimeout,
    /// The whole execution exceeded its deadline.
    ExecutionTimeout,
    /// The execution was canceled by a user.
    Canceled,
    /// Unexpected engine failure.
    Internal,
}

impl ErrorKind {
    /// Returns true if errors of this kind may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::HttpServer | ErrorKind::CallTimeout
        )
    }

    /// Stable string form, identical to the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TemplateResolution => "template_resolution",
            ErrorKind::ConditionEvaluation => "condition_evaluation",
            ErrorKind::Transform => "transform",
            ErrorKind::Network => "network",
            ErrorKind::HttpServer => "http_server",
            ErrorKind::HttpClient => "http_client",
            ErrorKind::CallTimeout => "call_timeout",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of an error: a kind and a redacted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    /// Create an error record. The message is redacted before storage.
    pub fn new(kind: ErrorKind, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: crate::sanitize::redact_text(message.as_ref()),
        }
    }
}

impl From<&StepError> for ErrorInfo {
    fn from(e: &StepError) -> Self {
        ErrorInfo::new(e.kind(), e.to_string())
    }
}

/// Failure of a single step attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    /// Step input could not be resolved against the context.
    #[error("template resolution failed: {0}")]
    Template(#[from] TemplateError),

    /// Condition expression failed to evaluate.
    #[error("condition evaluation failed: {0}")]
    Condition(ExpressionError),

    /// Transform mapping failed.
    #[error("transform failed: {0}")]
    Transform(String),

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Remote API answered with a status the step does not accept.
    #[error("HTTP {status} response")]
    HttpStatus { status: u16 },

    /// The HTTP call exceeded its own timeout.
    #[error("HTTP call timed out after {0} ms")]
    CallTimeout(u64),

    /// The step configuration could not be used at run time.
    #[error("invalid step configuration: {0}")]
    Validation(String),

    /// The step observed the cancellation signal.
    #[error("step canceled")]
    Canceled,
}

impl StepError {
    /// Error classification for retry decisions and persistence.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Template(_) => ErrorKind::TemplateResolution,
            StepError::Condition(_) => ErrorKind::ConditionEvaluation,
            StepError::Transform(_) => ErrorKind::Transform,
            StepError::Network(_) => ErrorKind::Network,
            StepError::HttpStatus { status } => {
                if is_retryable_status(*status) {
                    ErrorKind::HttpServer
                } else {
                    ErrorKind::HttpClient
                }
            }
            StepError::CallTimeout(_) => ErrorKind::CallTimeout,
            StepError::Validation(_) => ErrorKind::Validation,
            StepError::Canceled => ErrorKind::Canceled,
        }
    }

    /// Returns true if the retry policy may re-attempt this step.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// 5xx plus the two client statuses that signal "try again later".
fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

impl StepError {
    /// Map a connection failure for a call bounded by `timeout_ms`.
    pub(crate) fn from_connection(e: ConnectionError, timeout_ms: u64) -> Self {
        match e {
            ConnectionError::Timeout => StepError::CallTimeout(timeout_ms),
            ConnectionError::Network(msg) => StepError::Network(msg),
            other => StepError::Validation(other.to_string()),
        }
    }
}

/// Errors raised while checking a workflow before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Workflow has no steps.
    #[error("workflow '{0}' has no steps")]
    NoSteps(String),

    /// Two steps share a name.
    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    /// A single step is malformed.
    #[error("step '{step}': {message}")]
    InvalidStep { step: String, message: String },

    /// Workflow-level field is malformed.
    #[error("invalid workflow: {0}")]
    Workflow(String),
}

impl ValidationError {
    pub(crate) fn step(step: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidStep {
            step: step.to_string(),
            message: message.into(),
        }
    }
}

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No execution with this id exists.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// The workflow source has no workflow with this id.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow failed validation; nothing was executed.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The workflow's connection could not be resolved.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Unexpected engine failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
