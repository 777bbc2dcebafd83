//! Progress derived from an execution record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{ExecutionRecord, ExecutionStatus, StepStatus};

/// Point-in-time progress of an execution. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// 1-based index of the step being run or last touched; 0 before start.
    pub current_step: usize,
    pub total_steps: usize,
    /// Steps that ran to a normal outcome, including a false condition.
    pub completed_steps: usize,
    pub failed_steps: usize,
    /// Skipped steps; for terminal executions this includes steps that
    /// never ran.
    pub skipped_steps: usize,
    pub progress_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
}

impl ExecutionProgress {
    pub fn from_record(record: &ExecutionRecord) -> Self {
        let total = record.total_steps;
        let recorded = record.step_results.len();
        let terminal = record.is_terminal();

        let completed_steps =
            record.count_status(StepStatus::Success) + record.count_status(StepStatus::ConditionFailed);
        let failed_steps = record.count_status(StepStatus::Failed);
        let mut skipped_steps = record.count_status(StepStatus::Skipped);
        if terminal {
            skipped_steps += total.saturating_sub(recorded);
        }

        let current_step = match record.status {
            ExecutionStatus::Pending => 0,
            _ => (record.current_step_index + 1).min(total),
        };

        let progress_percent = if terminal || total == 0 {
            100.0
        } else {
            ((recorded as f64 / total as f64) * 1000.0).round() / 10.0
        };

        let estimated_time_remaining_ms = if terminal {
            Some(0)
        } else {
            estimate_remaining(record)
        };

        Self {
            execution_id: record.id,
            status: record.status,
            current_step,
            total_steps: total,
            completed_steps,
            failed_steps,
            skipped_steps,
            progress_percent,
            estimated_time_remaining_ms,
        }
    }
}

/// Mean duration of executed steps times the steps still to go.
fn estimate_remaining(record: &ExecutionRecord) -> Option<u64> {
    let durations: Vec<i64> = record
        .step_results
        .iter()
        .filter(|r| r.attempts > 0)
        .map(|r| r.duration_ms())
        .collect();
    if durations.is_empty() {
        return None;
    }
    let mean = durations.iter().sum::<i64>() as f64 / durations.len() as f64;
    let remaining = record.total_steps.saturating_sub(record.step_results.len());
    Some((mean * remaining as f64).round() as u64)
}

impl From<&ExecutionRecord> for ExecutionProgress {
    fn from(record: &ExecutionRecord) -> Self {
        Self::from_record(record)
    }
}
