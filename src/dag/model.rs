//! Data model for the DAG execution engine.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backoff strategy for a task-level retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Per-task retry policy; overrides nothing about the executor's own retry
/// of transport-level HTTP failures, this is DAG-level task retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default = "default_backoff_kind")]
    pub backoff: BackoffKind,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_initial_delay_ms() -> u64 {
    1000
}

/// Immutable task input to the DAG builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default, rename = "retryPolicy")]
    pub retry_policy: Option<RetryPolicy>,
}

/// A node in the built graph: the task plus its resolved edges and level.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub task: Task,
    pub dependencies: HashSet<String>,
    pub dependents: HashSet<String>,
    pub level: usize,
}

/// A directed edge in the graph's edge list, for the external DAG description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: String,
    pub to: String,
}

/// Terminal status of a single task's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Skipped,
}

/// Structured error attached to a failed or skipped task result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Outcome of executing a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: i64,
}

impl TaskResult {
    pub fn skipped(task_id: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Skipped,
            result: None,
            error: None,
            start: now,
            end: now,
            duration_ms: 0,
        }
    }
}

/// Overall outcome of a DAG execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failure,
}

/// Per-status counts for an execution's summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// DAG shape, echoed back in the execution response for introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagDescription {
    pub levels: Vec<Vec<String>>,
    pub edges: Vec<DagEdge>,
}

/// Full result of executing a DAG: one result per input task, plus the
/// aggregate status, summary counts, and the DAG shape it ran against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub tasks: HashMap<String, TaskResult>,
    pub summary: ExecutionSummary,
    pub dag: DagDescription,
}
