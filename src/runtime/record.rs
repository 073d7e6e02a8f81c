/// Execution records: the durable artifact of one workflow run
///
/// A record is created idempotently at the start of a run, keyed by
/// `(trigger_event_id, workflow_id)` so replayed trigger events reuse the
/// same row, updated in place as the run progresses, and finalized with
/// SUCCESS or FAILED. Records are never deleted.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

/// Lifecycle states of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    fn parse(raw: &str) -> ExecutionStatus {
        match raw {
            "PENDING" => ExecutionStatus::Pending,
            "RUNNING" => ExecutionStatus::Running,
            "SUCCESS" => ExecutionStatus::Success,
            _ => ExecutionStatus::Failed,
        }
    }
}

/// Persisted state of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub trigger_event_id: String,
    pub status: ExecutionStatus,
    /// Context snapshot: initial data at creation, final context on success.
    pub output: Value,
    pub error: Option<String>,
    pub error_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// SQLite-backed store for execution records
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
}

impl ExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the executions schema.
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS). The unique index on
    /// `(trigger_event_id, workflow_id)` is what makes run creation
    /// idempotent under replays.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                trigger_event_id TEXT NOT NULL,
                status TEXT NOT NULL,
                output JSON NOT NULL,
                error TEXT,
                error_detail TEXT,
                started_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                UNIQUE(trigger_event_id, workflow_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
            ON executions(workflow_id, started_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Idempotently create the record for a run, seeding `output` with the
    /// trigger's initial data so in-flight state is inspectable before
    /// completion. A replayed trigger event returns the existing row.
    pub async fn create(
        &self,
        trigger_event_id: &str,
        workflow_id: &str,
        initial_output: &Value,
    ) -> Result<ExecutionRecord> {
        let output_json = serde_json::to_string(initial_output)?;

        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, trigger_event_id, status, output, started_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(trigger_event_id, workflow_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workflow_id)
        .bind(trigger_event_id)
        .bind(ExecutionStatus::Pending.as_str())
        .bind(&output_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get_by_trigger(trigger_event_id, workflow_id)
            .await?
            .ok_or_else(|| crate::error::EngineError::Storage(sqlx::Error::RowNotFound))
    }

    /// Flip a record to RUNNING before the node walk begins.
    ///
    /// Also reopens a record finalized by a previous attempt, since the
    /// surrounding durable substrate may retry a whole run under the same
    /// trigger event id.
    pub async fn mark_running(&self, id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, error = NULL, error_detail = NULL, completed_at = NULL
            WHERE id = ?
            "#,
        )
        .bind(ExecutionStatus::Running.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Finalize a run as SUCCESS with the final context snapshot.
    pub async fn complete(&self, id: &str, output: &Value) -> Result<()> {
        let output_json = serde_json::to_string(output)?;
        sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, output = ?, completed_at = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
        )
        .bind(ExecutionStatus::Success.as_str())
        .bind(&output_json)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Finalize a run as FAILED with a human-readable error and optional
    /// detail (error chain).
    pub async fn fail(&self, id: &str, error: &str, detail: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, error = ?, error_detail = ?, completed_at = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
        )
        .bind(ExecutionStatus::Failed.as_str())
        .bind(error)
        .bind(detail)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Last-resort failure write, keyed the same way as record creation.
    ///
    /// Guarantees a FAILED record even when the main path's own failure
    /// write never happened (e.g. the run died before creating the record).
    /// A record already finalized with SUCCESS or FAILED is left untouched.
    pub async fn fail_upsert(
        &self,
        trigger_event_id: &str,
        workflow_id: &str,
        error: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, trigger_event_id, status, output, error, error_detail, started_at, completed_at)
            VALUES (?, ?, ?, ?, '{}', ?, ?, ?, ?)
            ON CONFLICT(trigger_event_id, workflow_id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                error_detail = excluded.error_detail,
                completed_at = excluded.completed_at
            WHERE executions.status NOT IN ('SUCCESS', 'FAILED')
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workflow_id)
        .bind(trigger_event_id)
        .bind(ExecutionStatus::Failed.as_str())
        .bind(error)
        .bind(detail)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(record_from_row).transpose()
    }

    pub async fn get_by_trigger(
        &self,
        trigger_event_id: &str,
        workflow_id: &str,
    ) -> Result<Option<ExecutionRecord>> {
        let row =
            sqlx::query("SELECT * FROM executions WHERE trigger_event_id = ? AND workflow_id = ?")
                .bind(trigger_event_id)
                .bind(workflow_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(record_from_row).transpose()
    }
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord> {
    let status: String = row.get("status");
    let output_json: String = row.get("output");
    Ok(ExecutionRecord {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        trigger_event_id: row.get("trigger_event_id"),
        status: ExecutionStatus::parse(&status),
        output: serde_json::from_str(&output_json)?,
        error: row.get("error"),
        error_detail: row.get("error_detail"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> ExecutionStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = ExecutionStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_is_idempotent_per_trigger_and_workflow() {
        let store = store().await;

        let first = store
            .create("evt-1", "wf-1", &json!({"seed": 1}))
            .await
            .unwrap();
        let second = store
            .create("evt-1", "wf-1", &json!({"seed": 2}))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        // The original seed survives; the replay's payload is discarded.
        assert_eq!(second.output, json!({"seed": 1}));

        let other = store
            .create("evt-2", "wf-1", &json!({}))
            .await
            .unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn complete_finalizes_with_output_snapshot() {
        let store = store().await;
        let record = store.create("evt-1", "wf-1", &json!({})).await.unwrap();

        store.mark_running(&record.id).await.unwrap();
        store
            .complete(&record.id, &json!({"answer": 42}))
            .await
            .unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Success);
        assert_eq!(loaded.output, json!({"answer": 42}));
        assert!(loaded.completed_at.is_some());
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn fail_upsert_creates_record_when_creation_never_landed() {
        let store = store().await;

        store
            .fail_upsert("evt-x", "wf-1", "boom", Some("detail"))
            .await
            .unwrap();

        let loaded = store.get_by_trigger("evt-x", "wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn fail_upsert_leaves_finalized_records_untouched() {
        let store = store().await;
        let record = store.create("evt-1", "wf-1", &json!({})).await.unwrap();
        store.mark_running(&record.id).await.unwrap();
        store.complete(&record.id, &json!({"done": true})).await.unwrap();

        store
            .fail_upsert("evt-1", "wf-1", "late failure", None)
            .await
            .unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Success);
        assert!(loaded.error.is_none());
    }
}
