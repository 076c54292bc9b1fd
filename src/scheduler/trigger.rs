//! Arms an in-memory timer per enabled scheduled task and dispatches fires
//! through the executor. Timers live only in memory; a restart re-arms them
//! from the store (§4.8). Mutations against a running loop (create, update,
//! delete, enable, disable, executeNow) go through this type rather than
//! straight to the store, so the live timer set stays in sync with it.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::fire;
use super::model::{NewScheduledTask, Schedule, ScheduledTask};
use super::store::ScheduleStore;
use super::SchedulerError;
use crate::http::client::HttpClient;

pub struct TriggerLoop {
    store: Arc<dyn ScheduleStore>,
    client: Arc<HttpClient>,
    shutdown: Notify,
    handles: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl TriggerLoop {
    pub fn new(store: Arc<dyn ScheduleStore>, client: Arc<HttpClient>) -> Self {
        Self {
            store,
            client,
            shutdown: Notify::new(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Sweep dangling pending history, re-arm every enabled task, then park
    /// until shutdown. Each task's timer runs in its own spawned task so a
    /// slow fire never delays other schedules.
    pub async fn run(self: Arc<Self>) {
        match self.store.sweep_dangling_pending().await {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "aborted dangling pending history entries from a previous run"),
            Err(e) => error!(error = %e, "failed to sweep dangling pending history"),
        }

        let tasks = match self.store.list_enabled().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "failed to list enabled scheduled tasks at startup");
                Vec::new()
            }
        };

        for task in tasks {
            self.schedule(task).await;
        }

        self.shutdown.notified().await;
        self.cancel_all().await;
    }

    /// §4.8 create: persist the row, then arm a live timer if it starts enabled.
    pub async fn create(self: &Arc<Self>, new_task: NewScheduledTask) -> Result<ScheduledTask, SchedulerError> {
        let task = self.store.create(new_task).await?;
        if task.enabled {
            self.schedule(task.clone()).await;
        }
        Ok(task)
    }

    /// §4.8 update: persist the row, then unschedule the old timer and
    /// arm a fresh one against the new definition.
    pub async fn update(self: &Arc<Self>, task: ScheduledTask) -> Result<(), SchedulerError> {
        self.store.update(task.clone()).await?;
        self.unschedule(task.id).await;
        if task.enabled {
            self.schedule(task).await;
        }
        Ok(())
    }

    /// §4.8 delete: unschedule the live timer, then remove the row.
    pub async fn delete(self: &Arc<Self>, id: Uuid) -> Result<(), SchedulerError> {
        self.unschedule(id).await;
        self.store.delete(id).await
    }

    /// §4.8 enable/disable: flip the row, then arm or unschedule the live timer.
    pub async fn set_enabled(self: &Arc<Self>, id: Uuid, enabled: bool) -> Result<(), SchedulerError> {
        self.store.set_enabled(id, enabled).await?;
        if enabled {
            let task = self.store.get(id).await?.ok_or(SchedulerError::NotFound(id))?;
            self.schedule(task).await;
        } else {
            self.unschedule(id).await;
        }
        Ok(())
    }

    /// §4.8 executeNow: bypass the armed timer and dispatch the task immediately.
    pub async fn execute_now(&self, id: Uuid) -> Result<(), SchedulerError> {
        let task = self.store.get(id).await?.ok_or(SchedulerError::NotFound(id))?;
        self.dispatch(&task).await;
        Ok(())
    }

    /// Whether `id` currently has a live, armed timer.
    pub async fn is_scheduled(&self, id: Uuid) -> bool {
        self.handles.lock().await.contains_key(&id)
    }

    /// Replace any existing timer for `task.id` with a fresh one. A one-shot
    /// timer removes itself from the registry once it fires.
    async fn schedule(self: &Arc<Self>, task: ScheduledTask) {
        self.unschedule(task.id).await;
        let id = task.id;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.arm(task).await;
            this.handles.lock().await.remove(&id);
        });
        self.handles.lock().await.insert(id, handle);
    }

    async fn unschedule(&self, id: Uuid) {
        if let Some(handle) = self.handles.lock().await.remove(&id) {
            handle.abort();
        }
    }

    async fn cancel_all(&self) {
        let mut handles = self.handles.lock().await;
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }

    async fn arm(&self, task: ScheduledTask) {
        match &task.schedule {
            Schedule::Once { execute_at } => self.arm_once(task.clone(), *execute_at).await,
            Schedule::Interval { interval_ms } => self.arm_interval(task, *interval_ms).await,
            Schedule::Cron { expression, .. } => self.arm_cron(task, expression).await,
        }
    }

    async fn arm_once(&self, task: ScheduledTask, execute_at: chrono::DateTime<Utc>) {
        let delay = (execute_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
        self.dispatch(&task).await;
    }

    async fn arm_interval(&self, task: ScheduledTask, interval_ms: u64) {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.dispatch(&task).await;
        }
    }

    async fn arm_cron(&self, task: ScheduledTask, expression: &str) {
        let schedule = match CronSchedule::from_str(expression) {
            Ok(s) => s,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "invalid cron expression, task will never fire");
                return;
            }
        };
        let tz = resolve_timezone(task.schedule.timezone(), task.id);

        loop {
            let Some(next) = next_fire(&schedule, tz) else {
                warn!(task_id = %task.id, "cron schedule has no further fires");
                return;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            self.dispatch(&task).await;
        }
    }

    async fn dispatch(&self, task: &ScheduledTask) {
        info!(task_id = %task.id, name = %task.name, "firing scheduled task");
        if let Err(e) = fire(self.store.as_ref(), &self.client, task).await {
            error!(task_id = %task.id, error = %e, "failed to record fire history");
        }
    }
}

/// Parse a stored IANA timezone name, falling back to UTC on a bad value.
fn resolve_timezone(name: &str, task_id: Uuid) -> Tz {
    name.parse().unwrap_or_else(|_| {
        warn!(task_id = %task_id, timezone = name, "unrecognized timezone, falling back to UTC");
        Tz::UTC
    })
}

/// The next fire time, evaluated in `tz` and converted back to UTC.
fn next_fire(schedule: &CronSchedule, tz: Tz) -> Option<chrono::DateTime<Utc>> {
    schedule.upcoming(tz).next().map(|next| next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::model::{Action, HttpActionConfig};
    use sqlx::sqlite::SqlitePool;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_task(enabled: bool) -> NewScheduledTask {
        NewScheduledTask {
            name: "probe".to_string(),
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
            enabled,
            tags: vec![],
            created_by: None,
        }
    }

    #[tokio::test]
    async fn create_arms_a_live_timer_when_enabled() {
        let store: Arc<dyn ScheduleStore> = Arc::new(super::super::store::SqliteScheduleStore::new(test_pool().await));
        let trigger_loop = Arc::new(TriggerLoop::new(store, Arc::new(HttpClient::new())));

        let task = trigger_loop.create(sample_task(true)).await.unwrap();
        assert!(trigger_loop.is_scheduled(task.id).await);

        trigger_loop.delete(task.id).await.unwrap();
        assert!(!trigger_loop.is_scheduled(task.id).await);
    }

    #[tokio::test]
    async fn create_does_not_arm_a_disabled_task() {
        let store: Arc<dyn ScheduleStore> = Arc::new(super::super::store::SqliteScheduleStore::new(test_pool().await));
        let trigger_loop = Arc::new(TriggerLoop::new(store, Arc::new(HttpClient::new())));

        let task = trigger_loop.create(sample_task(false)).await.unwrap();
        assert!(!trigger_loop.is_scheduled(task.id).await);
    }

    #[test]
    fn resolve_timezone_falls_back_to_utc_on_bad_name() {
        assert_eq!(resolve_timezone("UTC", Uuid::new_v4()), Tz::UTC);
        assert_eq!(resolve_timezone("not-a-real-zone", Uuid::new_v4()), Tz::UTC);
    }

    #[test]
    fn next_fire_honors_the_configured_timezone() {
        // "0 0 9 * * *" fires at 9am local. Evaluated in UTC vs. in a zone 5
        // hours behind, the two instants must differ by exactly that offset.
        let schedule = CronSchedule::from_str("0 0 9 * * *").unwrap();
        let utc_fire = next_fire(&schedule, Tz::UTC).unwrap();
        let eastern_fire = next_fire(&schedule, chrono_tz::America::New_York).unwrap();
        assert_ne!(utc_fire, eastern_fire);
    }

    #[tokio::test]
    async fn set_enabled_toggles_the_live_timer() {
        let store: Arc<dyn ScheduleStore> = Arc::new(super::super::store::SqliteScheduleStore::new(test_pool().await));
        let trigger_loop = Arc::new(TriggerLoop::new(store, Arc::new(HttpClient::new())));

        let task = trigger_loop.create(sample_task(false)).await.unwrap();
        assert!(!trigger_loop.is_scheduled(task.id).await);

        trigger_loop.set_enabled(task.id, true).await.unwrap();
        assert!(trigger_loop.is_scheduled(task.id).await);

        trigger_loop.set_enabled(task.id, false).await.unwrap();
        assert!(!trigger_loop.is_scheduled(task.id).await);
    }
}
