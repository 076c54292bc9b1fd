//! Relational store for scheduled tasks and their execution history,
//! matching the column layout in §6.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use super::model::{Action, HistoryStatus, NewScheduledTask, Schedule, ScheduledTask};
use super::SchedulerError;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create(&self, task: NewScheduledTask) -> Result<ScheduledTask, SchedulerError>;
    async fn update(&self, task: ScheduledTask) -> Result<(), SchedulerError>;
    async fn delete(&self, id: Uuid) -> Result<(), SchedulerError>;
    async fn get(&self, id: Uuid) -> Result<Option<ScheduledTask>, SchedulerError>;
    async fn list_enabled(&self) -> Result<Vec<ScheduledTask>, SchedulerError>;
    async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), SchedulerError>;

    async fn start_history(&self, execution_id: Uuid, task_id: Uuid, start_time: DateTime<Utc>) -> Result<(), SchedulerError>;
    async fn finish_history(
        &self,
        execution_id: Uuid,
        status: HistoryStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError>;
    /// Mark every row still `pending` as `aborted`. Run once at startup,
    /// before timers are re-armed, per §4.8's dangling-entry sweep.
    async fn sweep_dangling_pending(&self) -> Result<u64, SchedulerError>;
}

pub struct SqliteScheduleStore {
    pool: SqlitePool,
}

impl SqliteScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(
        id: String,
        name: String,
        description: Option<String>,
        schedule_type: String,
        schedule_expression: Option<String>,
        schedule_interval: Option<i64>,
        schedule_execute_at: Option<DateTime<Utc>>,
        action_type: String,
        action_config: String,
        timezone: String,
        retry_count: i64,
        retry_delay: i64,
        timeout: i64,
        enabled: i64,
        tags: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        created_by: Option<String>,
    ) -> Result<ScheduledTask, SchedulerError> {
        let schedule = Schedule::from_columns(&schedule_type, schedule_expression, schedule_interval, schedule_execute_at, timezone)
            .ok_or_else(|| SchedulerError::Corrupt(format!("malformed schedule row for task {id}")))?;
        let config: Value = serde_json::from_str(&action_config)?;
        let action = Action::from_type_and_config(&action_type, config)?;
        let tags: Vec<String> = serde_json::from_str(&tags)?;

        Ok(ScheduledTask {
            id: Uuid::parse_str(&id).map_err(|e| SchedulerError::Corrupt(e.to_string()))?,
            name,
            description,
            schedule,
            action,
            retry_count: retry_count.max(0) as u32,
            retry_delay_ms: retry_delay.max(0) as u64,
            timeout_ms: timeout.max(0) as u64,
            enabled: enabled != 0,
            tags,
            created_at,
            updated_at,
            created_by,
        })
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn create(&self, new_task: NewScheduledTask) -> Result<ScheduledTask, SchedulerError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let (schedule_type, schedule_expression, schedule_interval, schedule_execute_at) = match &new_task.schedule {
            Schedule::Cron { expression, .. } => ("cron", Some(expression.clone()), None, None),
            Schedule::Interval { interval_ms } => ("interval", None, Some(*interval_ms as i64), None),
            Schedule::Once { execute_at } => ("once", None, None, Some(*execute_at)),
        };
        let timezone = new_task.schedule.timezone().to_string();
        let action_type = new_task.action.type_name();
        let action_config = serde_json::to_string(&new_task.action.config_value())?;
        let tags = serde_json::to_string(&new_task.tags)?;

        sqlx::query(
            "INSERT INTO scheduled_tasks (id, name, description, schedule_type, schedule_expression, \
             schedule_interval, schedule_execute_at, action_type, action_config, timezone, retry_count, \
             retry_delay, timeout, enabled, tags, created_at, updated_at, created_by) \
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(id.to_string())
        .bind(&new_task.name)
        .bind(&new_task.description)
        .bind(schedule_type)
        .bind(&schedule_expression)
        .bind(schedule_interval)
        .bind(schedule_execute_at)
        .bind(action_type)
        .bind(&action_config)
        .bind(&timezone)
        .bind(new_task.retry_count as i64)
        .bind(new_task.retry_delay_ms as i64)
        .bind(new_task.timeout_ms as i64)
        .bind(new_task.enabled as i64)
        .bind(&tags)
        .bind(now)
        .bind(now)
        .bind(&new_task.created_by)
        .execute(&self.pool)
        .await?;

        Ok(ScheduledTask {
            id,
            name: new_task.name,
            description: new_task.description,
            schedule: new_task.schedule,
            action: new_task.action,
            retry_count: new_task.retry_count,
            retry_delay_ms: new_task.retry_delay_ms,
            timeout_ms: new_task.timeout_ms,
            enabled: new_task.enabled,
            tags: new_task.tags,
            created_at: now,
            updated_at: now,
            created_by: new_task.created_by,
        })
    }

    async fn update(&self, task: ScheduledTask) -> Result<(), SchedulerError> {
        let (schedule_type, schedule_expression, schedule_interval, schedule_execute_at) = match &task.schedule {
            Schedule::Cron { expression, .. } => ("cron", Some(expression.clone()), None, None),
            Schedule::Interval { interval_ms } => ("interval", None, Some(*interval_ms as i64), None),
            Schedule::Once { execute_at } => ("once", None, None, Some(*execute_at)),
        };
        let timezone = task.schedule.timezone().to_string();
        let action_config = serde_json::to_string(&task.action.config_value())?;
        let tags = serde_json::to_string(&task.tags)?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE scheduled_tasks SET name=?, description=?, schedule_type=?, schedule_expression=?, \
             schedule_interval=?, schedule_execute_at=?, action_type=?, action_config=?, timezone=?, \
             retry_count=?, retry_delay=?, timeout=?, enabled=?, tags=?, updated_at=? WHERE id=?",
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(schedule_type)
        .bind(&schedule_expression)
        .bind(schedule_interval)
        .bind(schedule_execute_at)
        .bind(task.action.type_name())
        .bind(&action_config)
        .bind(&timezone)
        .bind(task.retry_count as i64)
        .bind(task.retry_delay_ms as i64)
        .bind(task.timeout_ms as i64)
        .bind(task.enabled as i64)
        .bind(&tags)
        .bind(now)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), SchedulerError> {
        sqlx::query("DELETE FROM scheduled_tasks WHERE id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledTask>, SchedulerError> {
        let row = sqlx::query("SELECT * FROM scheduled_tasks WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(Self::row_to_task(
            row.try_get("id")?,
            row.try_get("name")?,
            row.try_get("description")?,
            row.try_get("schedule_type")?,
            row.try_get("schedule_expression")?,
            row.try_get("schedule_interval")?,
            row.try_get("schedule_execute_at")?,
            row.try_get("action_type")?,
            row.try_get("action_config")?,
            row.try_get("timezone")?,
            row.try_get("retry_count")?,
            row.try_get("retry_delay")?,
            row.try_get("timeout")?,
            row.try_get("enabled")?,
            row.try_get("tags")?,
            row.try_get("created_at")?,
            row.try_get("updated_at")?,
            row.try_get("created_by")?,
        )?))
    }

    async fn list_enabled(&self) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let rows = sqlx::query("SELECT * FROM scheduled_tasks WHERE enabled=1")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Self::row_to_task(
                    row.try_get("id")?,
                    row.try_get("name")?,
                    row.try_get("description")?,
                    row.try_get("schedule_type")?,
                    row.try_get("schedule_expression")?,
                    row.try_get("schedule_interval")?,
                    row.try_get("schedule_execute_at")?,
                    row.try_get("action_type")?,
                    row.try_get("action_config")?,
                    row.try_get("timezone")?,
                    row.try_get("retry_count")?,
                    row.try_get("retry_delay")?,
                    row.try_get("timeout")?,
                    row.try_get("enabled")?,
                    row.try_get("tags")?,
                    row.try_get("created_at")?,
                    row.try_get("updated_at")?,
                    row.try_get("created_by")?,
                )
            })
            .collect()
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), SchedulerError> {
        sqlx::query("UPDATE scheduled_tasks SET enabled=?, updated_at=? WHERE id=?")
            .bind(enabled as i64)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn start_history(&self, execution_id: Uuid, task_id: Uuid, start_time: DateTime<Utc>) -> Result<(), SchedulerError> {
        sqlx::query(
            "INSERT INTO execution_history (execution_id, task_id, start_time, end_time, status, result, error) \
             VALUES (?,?,?,NULL,?,NULL,NULL)",
        )
        .bind(execution_id.to_string())
        .bind(task_id.to_string())
        .bind(start_time)
        .bind(HistoryStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_history(
        &self,
        execution_id: Uuid,
        status: HistoryStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let result = result.map(|v| serde_json::to_string(&v)).transpose()?;
        sqlx::query("UPDATE execution_history SET end_time=?, status=?, result=?, error=? WHERE execution_id=?")
            .bind(Utc::now())
            .bind(status.as_str())
            .bind(result)
            .bind(error)
            .bind(execution_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sweep_dangling_pending(&self) -> Result<u64, SchedulerError> {
        let result = sqlx::query("UPDATE execution_history SET status=?, end_time=? WHERE status=?")
            .bind(HistoryStatus::Aborted.as_str())
            .bind(Utc::now())
            .bind(HistoryStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::model::{HttpActionConfig, Schedule};

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_task() -> NewScheduledTask {
        NewScheduledTask {
            name: "ping".to_string(),
            description: None,
            schedule: Schedule::Interval { interval_ms: 60_000 },
            action: Action::Http(HttpActionConfig {
                method: "GET".to_string(),
                url: "https://example.com".to_string(),
                headers: Default::default(),
                body: None,
            }),
            retry_count: 0,
            retry_delay_ms: 0,
            timeout_ms: 5_000,
            enabled: true,
            tags: vec!["ping".to_string()],
            created_by: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_task() {
        let store = SqliteScheduleStore::new(test_pool().await);
        let created = store.create(sample_task()).await.unwrap();
        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "ping");
        assert_eq!(fetched.action.type_name(), "http");
    }

    #[tokio::test]
    async fn sweeps_dangling_pending_history() {
        let store = SqliteScheduleStore::new(test_pool().await);
        let task = store.create(sample_task()).await.unwrap();
        let execution_id = Uuid::new_v4();
        store.start_history(execution_id, task.id, Utc::now()).await.unwrap();

        let swept = store.sweep_dangling_pending().await.unwrap();
        assert_eq!(swept, 1);
    }
}
