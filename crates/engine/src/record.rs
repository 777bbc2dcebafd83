//! Execution records and step results.
//!
//! An [`ExecutionRecord`] has a single writer (its runner task). Every
//! mutation goes through the methods here, which enforce the status state
//! machine and strict step ordering; observers only ever see whole-record
//! snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::definition::StepType;
use crate::error::ErrorInfo;

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Canceled => "canceled",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Canceled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "canceled" | "cancelled" => Ok(ExecutionStatus::Canceled),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    ConditionFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::ConditionFailed => "condition_failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(StepStatus::Success),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            "condition_failed" => Ok(StepStatus::ConditionFailed),
            other => Err(format!("unknown step status '{other}'")),
        }
    }
}

/// Persisted result of one attempted or skipped step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Attempts consumed; 0 for skipped steps.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Present iff `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl StepResult {
    pub fn success(
        step_index: usize,
        name: impl Into<String>,
        step_type: StepType,
        started_at: DateTime<Utc>,
        attempts: u32,
        output: Value,
    ) -> Self {
        Self {
            step_index,
            name: name.into(),
            step_type,
            status: StepStatus::Success,
            started_at,
            finished_at: Utc::now(),
            attempts,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(
        step_index: usize,
        name: impl Into<String>,
        step_type: StepType,
        started_at: DateTime<Utc>,
        attempts: u32,
        error: ErrorInfo,
    ) -> Self {
        Self {
            step_index,
            name: name.into(),
            step_type,
            status: StepStatus::Failed,
            started_at,
            finished_at: Utc::now(),
            attempts,
            output: None,
            error: Some(error),
        }
    }

    pub fn condition_failed(
        step_index: usize,
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            step_index,
            name: name.into(),
            step_type: StepType::Condition,
            status: StepStatus::ConditionFailed,
            started_at,
            finished_at: Utc::now(),
            attempts,
            output: Some(Value::Bool(false)),
            error: None,
        }
    }

    pub fn skipped(step_index: usize, name: impl Into<String>, step_type: StepType) -> Self {
        let now = Utc::now();
        Self {
            step_index,
            name: name.into(),
            step_type,
            status: StepStatus::Skipped,
            started_at: now,
            finished_at: now,
            attempts: 0,
            output: None,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }
}

/// Violations of the record's write rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("expected result for step {expected}, got {got}")]
    OutOfOrder { expected: usize, got: usize },

    #[error("all {0} step results already recorded")]
    StepsExhausted(usize),

    #[error("record is terminal ({0})")]
    Terminal(ExecutionStatus),
}

/// One invocation of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub triggered_by: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Index of the step being run, or of the last step touched.
    pub current_step_index: usize,
    /// Attempts consumed by the current (or last) step.
    pub attempt_count: u32,
    /// Attempt ceiling for the current (or last) step.
    pub max_attempts: u32,
    pub total_steps: usize,
    pub step_results: Vec<StepResult>,
    /// Why the execution failed or was canceled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ExecutionRecord {
    /// Create a pending record.
    pub fn new(
        id: Uuid,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        triggered_by: impl Into<String>,
        total_steps: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            id,
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            triggered_by: triggered_by.into(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            current_step_index: 0,
            attempt_count: 0,
            max_attempts,
            total_steps,
            step_results: Vec::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, stamping `completed_at` on terminal states.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), RecordError> {
        if !self.status.can_transition_to(next) {
            return Err(RecordError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Set a terminal status with an optional reason.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<ErrorInfo>) -> Result<(), RecordError> {
        if !status.is_terminal() {
            return Err(RecordError::IllegalTransition {
                from: self.status,
                to: status,
            });
        }
        self.transition(status)?;
        self.error = error;
        Ok(())
    }

    /// Append the next step result. Results must arrive in index order.
    pub fn push_result(&mut self, result: StepResult) -> Result<(), RecordError> {
        if self.is_terminal() {
            return Err(RecordError::Terminal(self.status));
        }
        let expected = self.step_results.len();
        if expected >= self.total_steps {
            return Err(RecordError::StepsExhausted(self.total_steps));
        }
        if result.step_index != expected {
            return Err(RecordError::OutOfOrder {
                expected,
                got: result.step_index,
            });
        }
        self.current_step_index = result.step_index;
        self.step_results.push(result);
        Ok(())
    }

    /// Note that a step is starting.
    pub fn begin_step(&mut self, index: usize, max_attempts: u32) {
        self.current_step_index = index;
        self.attempt_count = 0;
        self.max_attempts = max_attempts;
    }

    /// Note that another attempt of the current step has started.
    pub fn record_attempt(&mut self, attempt: u32) {
        self.attempt_count = attempt;
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0))
    }

    pub fn count_status(&self, status: StepStatus) -> usize {
        self.step_results.iter().filter(|r| r.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn record(total: usize) -> ExecutionRecord {
        ExecutionRecord::new(Uuid::new_v4(), "wf", "Workflow", "tester", total, 3)
    }

    #[test]
    fn test_state_machine() {
        let mut rec = record(1);
        assert!(rec.transition(ExecutionStatus::Completed).is_err());
        rec.transition(ExecutionStatus::Running).unwrap();
        rec.finish(ExecutionStatus::Completed, None).unwrap();
        assert!(rec.completed_at.is_some());

        // Terminal states are absorbing
        for next in [
            ExecutionStatus::Running,
            ExecutionStatus::Failed,
            ExecutionStatus::Canceled,
            ExecutionStatus::Completed,
        ] {
            assert!(rec.transition(next).is_err());
        }
        assert_eq!(rec.status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_finish_requires_terminal_status() {
        let mut rec = record(1);
        rec.transition(ExecutionStatus::Running).unwrap();
        assert!(rec.finish(ExecutionStatus::Running, None).is_err());
    }

    #[test]
    fn test_results_strictly_ordered() {
        let mut rec = record(2);
        rec.transition(ExecutionStatus::Running).unwrap();
        let now = Utc::now();
        let err = rec
            .push_result(StepResult::success(1, "b", StepType::ApiCall, now, 1, json!({})))
            .unwrap_err();
        assert_eq!(err, RecordError::OutOfOrder { expected: 0, got: 1 });

        rec.push_result(StepResult::success(0, "a", StepType::ApiCall, now, 1, json!({})))
            .unwrap();
        rec.push_result(StepResult::skipped(1, "b", StepType::Transform)).unwrap();
        assert_eq!(
            rec.push_result(StepResult::skipped(2, "c", StepType::Transform)),
            Err(RecordError::StepsExhausted(2))
        );
    }

    #[test]
    fn test_no_results_after_terminal() {
        let mut rec = record(2);
        rec.transition(ExecutionStatus::Running).unwrap();
        rec.finish(
            ExecutionStatus::Canceled,
            Some(ErrorInfo::new(ErrorKind::Canceled, "canceled")),
        )
        .unwrap();
        assert!(matches!(
            rec.push_result(StepResult::skipped(0, "a", StepType::ApiCall)),
            Err(RecordError::Terminal(ExecutionStatus::Canceled))
        ));
    }

    #[test]
    fn test_failed_result_carries_error() {
        let result = StepResult::failed(
            0,
            "a",
            StepType::ApiCall,
            Utc::now(),
            3,
            ErrorInfo::new(ErrorKind::HttpServer, "HTTP 503 response"),
        );
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.is_some());
        assert!(result.output.is_none());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&ExecutionStatus::Canceled).unwrap(), "\"canceled\"");
        assert_eq!(
            serde_json::to_string(&StepStatus::ConditionFailed).unwrap(),
            "\"condition_failed\""
        );
        assert_eq!("running".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Running);
        assert_eq!("skipped".parse::<StepStatus>().unwrap(), StepStatus::Skipped);
    }
}
