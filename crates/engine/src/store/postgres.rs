//! PostgreSQL execution store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::{ExecutionStore, StoreError};
use crate::error::ErrorInfo;
use crate::record::{ExecutionRecord, ExecutionStatus, StepResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id                  UUID PRIMARY KEY,
        workflow_id         TEXT NOT NULL,
        workflow_name       TEXT NOT NULL,
        triggered_by        TEXT NOT NULL,
        status              TEXT NOT NULL,
        started_at          TIMESTAMPTZ NOT NULL,
        completed_at        TIMESTAMPTZ,
        current_step_index  INTEGER NOT NULL DEFAULT 0,
        attempt_count       INTEGER NOT NULL DEFAULT 0,
        max_attempts        INTEGER NOT NULL,
        total_steps         INTEGER NOT NULL,
        error               JSONB
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS executions_workflow_started_idx
        ON executions (workflow_id, started_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS executions_status_idx
        ON executions (status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS step_results (
        execution_id  UUID NOT NULL REFERENCES executions (id) ON DELETE CASCADE,
        step_index    INTEGER NOT NULL,
        name          TEXT NOT NULL,
        step_type     TEXT NOT NULL,
        status        TEXT NOT NULL,
        started_at    TIMESTAMPTZ NOT NULL,
        finished_at   TIMESTAMPTZ NOT NULL,
        attempts      INTEGER NOT NULL,
        output        JSONB,
        error         JSONB,
        PRIMARY KEY (execution_id, step_index)
    )
    "#,
];

const EXECUTION_COLUMNS: &str = "id, workflow_id, workflow_name, triggered_by, status, started_at, \
     completed_at, current_step_index, attempt_count, max_attempts, total_steps, error";

/// Reads span two tables; one snapshot keeps a record and its steps in step.
const READ_SNAPSHOT: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY";

const STEP_COLUMNS: &str = "execution_id, step_index, name, step_type, status, started_at, \
     finished_at, attempts, output, error";

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: String,
    workflow_name: String,
    triggered_by: String,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    current_step_index: i32,
    attempt_count: i32,
    max_attempts: i32,
    total_steps: i32,
    error: Option<Value>,
}

#[derive(Debug, FromRow)]
struct StepRow {
    execution_id: Uuid,
    step_index: i32,
    name: String,
    step_type: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    attempts: i32,
    output: Option<Value>,
    error: Option<Value>,
}

fn serialization(message: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(message.to_string())
}

fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_usize(n: i32) -> usize {
    usize::try_from(n).unwrap_or(0)
}

/// Decode a snake_case enum stored as text.
fn parse_enum<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(serialization)
}

fn error_json(error: &Option<ErrorInfo>) -> Result<Option<Value>, StoreError> {
    error
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(serialization)
}

fn parse_error(value: Option<Value>) -> Result<Option<ErrorInfo>, StoreError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(serialization)
}

impl StepRow {
    fn into_result(self) -> Result<StepResult, StoreError> {
        Ok(StepResult {
            step_index: to_usize(self.step_index),
            name: self.name,
            step_type: parse_enum(&self.step_type)?,
            status: self.status.parse().map_err(serialization)?,
            started_at: self.started_at,
            finished_at: self.finished_at,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            output: self.output,
            error: parse_error(self.error)?,
        })
    }
}

impl ExecutionRow {
    fn into_record(self, steps: Vec<StepRow>) -> Result<ExecutionRecord, StoreError> {
        let status: ExecutionStatus = self.status.parse().map_err(serialization)?;
        let step_results = steps
            .into_iter()
            .map(StepRow::into_result)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExecutionRecord {
            id: self.id,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name,
            triggered_by: self.triggered_by,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            current_step_index: to_usize(self.current_step_index),
            attempt_count: u32::try_from(self.attempt_count).unwrap_or(0),
            max_attempts: u32::try_from(self.max_attempts).unwrap_or(0),
            total_steps: to_usize(self.total_steps),
            step_results,
            error: parse_error(self.error)?,
        })
    }
}

/// Execution store backed by PostgreSQL.
///
/// Step results live in their own table keyed by `(execution_id,
/// step_index)`; a save appends only the results not yet stored.
#[derive(Debug, Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if absent.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Execution store schema ready");
        Ok(())
    }

    async fn insert_steps(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        steps: &[StepResult],
    ) -> Result<(), StoreError> {
        for step in steps {
            sqlx::query(&format!(
                "INSERT INTO step_results ({STEP_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (execution_id, step_index) DO NOTHING"
            ))
            .bind(id)
            .bind(to_i32(step.step_index))
            .bind(&step.name)
            .bind(step.step_type.as_str())
            .bind(step.status.as_str())
            .bind(step.started_at)
            .bind(step.finished_at)
            .bind(i32::try_from(step.attempts).unwrap_or(i32::MAX))
            .bind(step.output.as_ref())
            .bind(error_json(&step.error)?)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn begin_read(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(READ_SNAPSHOT).execute(&mut *tx).await?;
        Ok(tx)
    }

    /// Load the step results of `rows` inside the same snapshot and finish
    /// the read.
    async fn hydrate(
        mut tx: Transaction<'_, Postgres>,
        rows: Vec<ExecutionRow>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let steps = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {STEP_COLUMNS} FROM step_results \
             WHERE execution_id = ANY($1) ORDER BY execution_id, step_index ASC"
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        attach_steps(rows, steps)
    }
}

/// Pair each execution row with its step rows, keeping the row order.
fn attach_steps(rows: Vec<ExecutionRow>, steps: Vec<StepRow>) -> Result<Vec<ExecutionRecord>, StoreError> {
    let mut grouped: HashMap<Uuid, Vec<StepRow>> = HashMap::new();
    for step in steps {
        grouped.entry(step.execution_id).or_default().push(step);
    }
    rows.into_iter()
        .map(|row| {
            let row_steps = grouped.remove(&row.id).unwrap_or_default();
            row.into_record(row_steps)
        })
        .collect()
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(&format!(
            "INSERT INTO executions ({EXECUTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO NOTHING"
        ))
        .bind(record.id)
        .bind(&record.workflow_id)
        .bind(&record.workflow_name)
        .bind(&record.triggered_by)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(to_i32(record.current_step_index))
        .bind(i32::try_from(record.attempt_count).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.max_attempts).unwrap_or(i32::MAX))
        .bind(to_i32(record.total_steps))
        .bind(error_json(&record.error)?)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(record.id));
        }
        Self::insert_steps(&mut tx, record.id, &record.step_results).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock the row so the terminal check and the update are atomic.
        let stored = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1 FOR UPDATE"
        ))
        .bind(record.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(record.id))?;

        let stored_steps: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM step_results WHERE execution_id = $1")
                .bind(record.id)
                .fetch_one(&mut *tx)
                .await?;
        let stored_count = usize::try_from(stored_steps.0).unwrap_or(0);

        let status: ExecutionStatus = stored.status.parse().map_err(serialization)?;
        if status.is_terminal() {
            return Err(StoreError::Terminal(record.id));
        }
        if record.step_results.len() < stored_count {
            return Err(StoreError::Regression {
                id: record.id,
                stored: stored_count,
                incoming: record.step_results.len(),
            });
        }

        sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, completed_at = $3, current_step_index = $4,
                attempt_count = $5, max_attempts = $6, error = $7
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'canceled')
            "#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.completed_at)
        .bind(to_i32(record.current_step_index))
        .bind(i32::try_from(record.attempt_count).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.max_attempts).unwrap_or(i32::MAX))
        .bind(error_json(&record.error)?)
        .execute(&mut *tx)
        .await?;

        Self::insert_steps(&mut tx, record.id, &record.step_results[stored_count..]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let mut tx = self.begin_read().await?;
        let rows: Vec<ExecutionRow> = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .into_iter()
        .collect();

        Ok(Self::hydrate(tx, rows).await?.pop())
    }

    async fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut tx = self.begin_read().await?;
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE workflow_id = $1 ORDER BY started_at DESC, id DESC LIMIT $2"
        ))
        .bind(workflow_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        Self::hydrate(tx, rows).await
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut tx = self.begin_read().await?;
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE status = $1 ORDER BY started_at DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&mut *tx)
        .await?;

        Self::hydrate(tx, rows).await
    }
}
