//! Scheduled task and execution history data model (§3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// When a scheduled task fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    Cron { expression: String, timezone: String },
    Interval { interval_ms: u64 },
    Once { execute_at: DateTime<Utc> },
}

impl Schedule {
    pub fn type_name(&self) -> &'static str {
        match self {
            Schedule::Cron { .. } => "cron",
            Schedule::Interval { .. } => "interval",
            Schedule::Once { .. } => "once",
        }
    }

    /// The timezone to arm this schedule in; only `Cron` carries one
    /// explicitly, everything else runs in UTC.
    pub fn timezone(&self) -> &str {
        match self {
            Schedule::Cron { timezone, .. } => timezone,
            _ => "UTC",
        }
    }

    pub fn from_columns(
        schedule_type: &str,
        expression: Option<String>,
        interval_ms: Option<i64>,
        execute_at: Option<DateTime<Utc>>,
        timezone: String,
    ) -> Option<Self> {
        match schedule_type {
            "cron" => Some(Schedule::Cron {
                expression: expression?,
                timezone,
            }),
            "interval" => Some(Schedule::Interval {
                interval_ms: u64::try_from(interval_ms?).ok()?,
            }),
            "once" => Some(Schedule::Once { execute_at: execute_at? }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpActionConfig {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Http(HttpActionConfig),
    Webhook(HttpActionConfig),
    File(Value),
    Database(Value),
    Email(Value),
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Http(_) => "http",
            Action::Webhook(_) => "webhook",
            Action::File(_) => "file",
            Action::Database(_) => "database",
            Action::Email(_) => "email",
        }
    }

    /// The action's config payload alone, for storage in `action_config`
    /// (the discriminant lives in its own `action_type` column).
    pub fn config_value(&self) -> Value {
        match self {
            Action::Http(c) | Action::Webhook(c) => serde_json::to_value(c).unwrap_or(Value::Null),
            Action::File(v) | Action::Database(v) | Action::Email(v) => v.clone(),
        }
    }

    pub fn from_type_and_config(action_type: &str, config: Value) -> Result<Self, serde_json::Error> {
        Ok(match action_type {
            "http" => Action::Http(serde_json::from_value(config)?),
            "webhook" => Action::Webhook(serde_json::from_value(config)?),
            "file" => Action::File(config),
            "database" => Action::Database(config),
            "email" => Action::Email(config),
            other => return Err(serde::de::Error::custom(format!("unknown action type: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub schedule: Schedule,
    pub action: Action,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// A new task as supplied by a caller; `create` assigns the id and
/// timestamps.
pub struct NewScheduledTask {
    pub name: String,
    pub description: Option<String>,
    pub schedule: Schedule,
    pub action: Action,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Pending,
    Success,
    Failed,
    Timeout,
    Aborted,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Pending => "pending",
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
            HistoryStatus::Timeout => "timeout",
            HistoryStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => HistoryStatus::Success,
            "failed" => HistoryStatus::Failed,
            "timeout" => HistoryStatus::Timeout,
            "aborted" => HistoryStatus::Aborted,
            _ => HistoryStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: HistoryStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}
