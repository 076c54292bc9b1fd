//! One-shot scheduler scenario (S6): a task scheduled one second out fires
//! exactly once and leaves a successful history entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use taskforge::http::HttpClient;
use taskforge::scheduler::model::{Action, HttpActionConfig, NewScheduledTask, Schedule};
use taskforge::scheduler::{ScheduleStore, SqliteScheduleStore, TriggerLoop};

#[tokio::test]
async fn one_shot_task_fires_once_and_records_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/tick")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"fired":true}"#)
        .expect(1)
        .create_async()
        .await;

    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store: Arc<dyn ScheduleStore> = Arc::new(SqliteScheduleStore::new(pool));

    let client = Arc::new(HttpClient::new());
    let trigger_loop = Arc::new(TriggerLoop::new(store.clone(), client));
    let handle = tokio::spawn(trigger_loop.clone().run());

    let created = trigger_loop
        .create(NewScheduledTask {
            name: "one-shot-probe".to_string(),
            description: None,
            schedule: Schedule::Once {
                execute_at: Utc::now() + chrono::Duration::milliseconds(300),
            },
            action: Action::Http(HttpActionConfig {
                method: "GET".to_string(),
                url: format!("{}/tick", server.url()),
                headers: Default::default(),
                body: None,
            }),
            retry_count: 0,
            retry_delay_ms: 0,
            timeout_ms: 2_000,
            enabled: true,
            tags: vec![],
            created_by: None,
        })
        .await
        .unwrap();

    assert!(trigger_loop.is_scheduled(created.id).await);

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    mock.assert_async().await;
    assert!(!trigger_loop.is_scheduled(created.id).await);

    trigger_loop.shutdown();
    let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
}
