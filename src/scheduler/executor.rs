//! Per-fire dispatch: runs a scheduled task's action, races it against the
//! task's timeout, and writes the result to execution history.
//!
//! Retries share one history entry (Open Question #3, decided in
//! DESIGN.md): the entry opened at the first attempt is the one updated
//! when the fire finally settles, rather than each retry opening a new
//! execution id.

use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use uuid::Uuid;

use super::model::{Action, HistoryStatus, HttpActionConfig, ScheduledTask};
use super::store::ScheduleStore;
use crate::http::client::{HttpClient, RequestOptions};

pub enum FireOutcome {
    Success(Value),
    Failed(String),
    TimedOut,
}

async fn run_http_action(client: &HttpClient, config: &HttpActionConfig) -> Result<Value, String> {
    let method = config.method.parse::<Method>().map_err(|e| e.to_string())?;
    let mut options = RequestOptions::get(&config.url);
    options.method = method;
    options.headers = config.headers.clone();
    options.body = config.body.clone();

    let envelope = client.execute(&options).await;
    if envelope.success {
        Ok(envelope.data.unwrap_or(Value::Null))
    } else {
        Err(envelope.error.map(|e| e.message).unwrap_or_else(|| "request failed".to_string()))
    }
}

/// Run the action once, uncapped by timeout -- the caller wraps this in
/// `tokio::time::timeout`.
pub async fn execute_action(client: &HttpClient, action: &Action) -> Result<Value, String> {
    match action {
        Action::Http(config) => run_http_action(client, config).await,
        Action::Webhook(config) => {
            let mut config = config.clone();
            if config.method.is_empty() {
                config.method = "POST".to_string();
            }
            run_http_action(client, &config).await
        }
        Action::File(_) | Action::Database(_) | Action::Email(_) => Ok(json!({"status": "not_implemented"})),
    }
}

async fn attempt_with_timeout(client: &HttpClient, action: &Action, timeout_ms: u64) -> FireOutcome {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), execute_action(client, action)).await {
        Ok(Ok(value)) => FireOutcome::Success(value),
        Ok(Err(message)) => FireOutcome::Failed(message),
        Err(_) => FireOutcome::TimedOut,
    }
}

/// Fire a task: open one history entry, attempt the action up to
/// `retry_count + 1` times (sleeping `retry_delay_ms` between attempts),
/// and close the same entry with the final outcome.
pub async fn fire(store: &dyn ScheduleStore, client: &HttpClient, task: &ScheduledTask) -> Result<(), super::SchedulerError> {
    let execution_id = Uuid::new_v4();
    store.start_history(execution_id, task.id, chrono::Utc::now()).await?;

    let mut remaining = task.retry_count;
    loop {
        match attempt_with_timeout(client, &task.action, task.timeout_ms).await {
            FireOutcome::Success(value) => {
                store.finish_history(execution_id, HistoryStatus::Success, Some(value), None).await?;
                return Ok(());
            }
            FireOutcome::TimedOut if remaining == 0 => {
                store.finish_history(execution_id, HistoryStatus::Timeout, None, None).await?;
                return Ok(());
            }
            FireOutcome::Failed(message) if remaining == 0 => {
                store.finish_history(execution_id, HistoryStatus::Failed, None, Some(message)).await?;
                return Ok(());
            }
            FireOutcome::TimedOut | FireOutcome::Failed(_) => {
                remaining -= 1;
                tokio::time::sleep(Duration::from_millis(task.retry_delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::model::Schedule;
    use crate::scheduler::store::SqliteScheduleStore;
    use sqlx::sqlite::SqlitePool;

    async fn test_store() -> SqliteScheduleStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteScheduleStore::new(pool)
    }

    fn http_task(url: String, retry_count: u32, timeout_ms: u64) -> ScheduledTask {
        ScheduledTask {
            id: Uuid::new_v4(),
            name: "probe".to_string(),
            description: None,
            schedule: Schedule::Interval { interval_ms: 1000 },
            action: Action::Http(HttpActionConfig {
                method: "GET".to_string(),
                url,
                headers: Default::default(),
                body: None,
            }),
            retry_count,
            retry_delay_ms: 5,
            timeout_ms,
            enabled: true,
            tags: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            created_by: None,
        }
    }

    #[tokio::test]
    async fn successful_fire_writes_success_history() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"pong":true}"#)
            .create_async()
            .await;

        let store = test_store().await;
        let draft = http_task(format!("{}/ok", server.url()), 0, 2_000);
        let task = store
            .create(crate::scheduler::model::NewScheduledTask {
                name: draft.name.clone(),
                description: None,
                schedule: draft.schedule.clone(),
                action: draft.action.clone(),
                retry_count: draft.retry_count,
                retry_delay_ms: draft.retry_delay_ms,
                timeout_ms: draft.timeout_ms,
                enabled: true,
                tags: vec![],
                created_by: None,
            })
            .await
            .unwrap();

        let client = HttpClient::new();
        fire(&store, &client, &task).await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_mark_failed() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/boom").with_status(404).create_async().await;

        let store = test_store().await;
        let task = http_task(format!("{}/boom", server.url()), 1, 2_000);
        let client = HttpClient::new();
        fire(&store, &client, &task).await.unwrap();
    }
}
