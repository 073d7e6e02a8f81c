/// SQLite persistence for scheduled workflows
///
/// One row per schedule trigger a user has attached. The runner mutates the
/// row after every firing (recomputed `next_run_at`, stamped `last_run_at`
/// and `last_execution_id`); `enabled` is flipped off when the next
/// occurrence would pass `end_date`, ending the chain without deleting the
/// record.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};

/// Recurrence rule families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    Interval,
    Daily,
    Weekly,
    Monthly,
    Cron,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Interval => "INTERVAL",
            ScheduleType::Daily => "DAILY",
            ScheduleType::Weekly => "WEEKLY",
            ScheduleType::Monthly => "MONTHLY",
            ScheduleType::Cron => "CRON",
        }
    }

    fn parse(raw: &str) -> Result<ScheduleType> {
        match raw {
            "INTERVAL" => Ok(ScheduleType::Interval),
            "DAILY" => Ok(ScheduleType::Daily),
            "WEEKLY" => Ok(ScheduleType::Weekly),
            "MONTHLY" => Ok(ScheduleType::Monthly),
            "CRON" => Ok(ScheduleType::Cron),
            other => Err(EngineError::Scheduling(format!(
                "unknown schedule type: {other}"
            ))),
        }
    }
}

/// Units for INTERVAL schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Days => "days",
        }
    }

    fn parse(raw: &str) -> Result<IntervalUnit> {
        match raw {
            "minutes" => Ok(IntervalUnit::Minutes),
            "hours" => Ok(IntervalUnit::Hours),
            "days" => Ok(IntervalUnit::Days),
            other => Err(EngineError::Scheduling(format!(
                "unknown interval unit: {other}"
            ))),
        }
    }
}

/// Persisted state of one recurring schedule.
///
/// `hour`/`minute` arrive already localized; the recurrence policy is
/// timezone-naive and `timezone` is carried for the editor's benefit.
/// `days_of_week` uses 0 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledWorkflow {
    pub id: String,
    pub workflow_id: String,
    /// The schedule-trigger node this schedule belongs to.
    pub node_id: String,
    pub schedule_type: ScheduleType,
    pub timezone: String,
    pub interval_value: Option<i64>,
    pub interval_unit: Option<IntervalUnit>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub days_of_week: Option<Vec<u32>>,
    pub day_of_month: Option<u32>,
    pub cron_expression: Option<String>,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Trigger event id of the most recent firing.
    pub last_execution_id: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
}

/// SQLite-backed store for scheduled workflows
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the scheduled workflows schema.
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_workflows (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                schedule_type TEXT NOT NULL,
                timezone TEXT NOT NULL,
                interval_value INTEGER,
                interval_unit TEXT,
                hour INTEGER,
                minute INTEGER,
                days_of_week JSON,
                day_of_month INTEGER,
                cron_expression TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                next_run_at TIMESTAMP,
                last_run_at TIMESTAMP,
                last_execution_id TEXT,
                end_date TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_schedules_due
            ON scheduled_workflows(enabled, next_run_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a schedule, replacing any previous version of the same id.
    pub async fn save(&self, schedule: &ScheduledWorkflow) -> Result<()> {
        let days_json = schedule
            .days_of_week
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_workflows
                (id, workflow_id, node_id, schedule_type, timezone,
                 interval_value, interval_unit, hour, minute, days_of_week,
                 day_of_month, cron_expression, enabled, next_run_at,
                 last_run_at, last_execution_id, end_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                workflow_id = excluded.workflow_id,
                node_id = excluded.node_id,
                schedule_type = excluded.schedule_type,
                timezone = excluded.timezone,
                interval_value = excluded.interval_value,
                interval_unit = excluded.interval_unit,
                hour = excluded.hour,
                minute = excluded.minute,
                days_of_week = excluded.days_of_week,
                day_of_month = excluded.day_of_month,
                cron_expression = excluded.cron_expression,
                enabled = excluded.enabled,
                next_run_at = excluded.next_run_at,
                last_run_at = excluded.last_run_at,
                last_execution_id = excluded.last_execution_id,
                end_date = excluded.end_date
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.workflow_id)
        .bind(&schedule.node_id)
        .bind(schedule.schedule_type.as_str())
        .bind(&schedule.timezone)
        .bind(schedule.interval_value)
        .bind(schedule.interval_unit.map(|u| u.as_str()))
        .bind(schedule.hour.map(|h| h as i64))
        .bind(schedule.minute.map(|m| m as i64))
        .bind(days_json)
        .bind(schedule.day_of_month.map(|d| d as i64))
        .bind(&schedule.cron_expression)
        .bind(schedule.enabled)
        .bind(schedule.next_run_at)
        .bind(schedule.last_run_at)
        .bind(&schedule.last_execution_id)
        .bind(schedule.end_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScheduledWorkflow>> {
        let row = sqlx::query("SELECT * FROM scheduled_workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(schedule_from_row).transpose()
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE scheduled_workflows SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the bookkeeping of one firing in a single update.
    pub async fn record_firing(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
        last_execution_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_workflows
            SET next_run_at = ?, last_run_at = ?, last_execution_id = ?
            WHERE id = ?
            "#,
        )
        .bind(next_run_at)
        .bind(last_run_at)
        .bind(last_execution_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All enabled schedules. Used at startup to resume chains lost with
    /// the previous process.
    pub async fn all_enabled(&self) -> Result<Vec<ScheduledWorkflow>> {
        let rows = sqlx::query("SELECT * FROM scheduled_workflows WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(schedule_from_row).collect()
    }

    /// Enabled schedules whose `next_run_at` is at or before `now`.
    ///
    /// Consumed by the reconciliation poller to re-arm chains lost to a
    /// crash; the poller never fires workflows itself.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledWorkflow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM scheduled_workflows
            WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(schedule_from_row).collect()
    }
}

fn schedule_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ScheduledWorkflow> {
    let schedule_type: String = row.get("schedule_type");
    let interval_unit: Option<String> = row.get("interval_unit");
    let days_json: Option<String> = row.get("days_of_week");

    Ok(ScheduledWorkflow {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        node_id: row.get("node_id"),
        schedule_type: ScheduleType::parse(&schedule_type)?,
        timezone: row.get("timezone"),
        interval_value: row.get("interval_value"),
        interval_unit: interval_unit.as_deref().map(IntervalUnit::parse).transpose()?,
        hour: row.get::<Option<i64>, _>("hour").map(|h| h as u32),
        minute: row.get::<Option<i64>, _>("minute").map(|m| m as u32),
        days_of_week: days_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        day_of_month: row.get::<Option<i64>, _>("day_of_month").map(|d| d as u32),
        cron_expression: row.get("cron_expression"),
        enabled: row.get("enabled"),
        next_run_at: row.get("next_run_at"),
        last_run_at: row.get("last_run_at"),
        last_execution_id: row.get("last_execution_id"),
        end_date: row.get("end_date"),
    })
}
