//! Persistent cron/interval/one-shot scheduler: store, trigger loop, and
//! per-fire executor.

pub mod executor;
pub mod model;
pub mod store;
pub mod trigger;

use thiserror::Error;
use uuid::Uuid;

pub use executor::{execute_action, FireOutcome};
pub use model::{Action, HistoryStatus, HttpActionConfig, NewScheduledTask, Schedule, ScheduledTask};
pub use store::{ScheduleStore, SqliteScheduleStore};
pub use trigger::TriggerLoop;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("malformed scheduler row: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt scheduler row: {0}")]
    Corrupt(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("scheduled task not found: {0}")]
    NotFound(Uuid),
}
