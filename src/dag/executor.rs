//! Executes a validated `Dag` against a tool registry with a bounded
//! concurrency pool per level.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::builder::Dag;
use super::model::{
    BackoffKind, DagDescription, DagEdge, ExecutionResult, ExecutionStatus, ExecutionSummary,
    Task, TaskError, TaskResult, TaskStatus,
};
use super::substitution::resolve;

/// A named, invokable capability the DAG executor can dispatch tasks to.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(&self, params: HashMap<String, Value>) -> Result<Value, ToolError>;
}

/// Error returned by a tool invocation. `retryable` feeds the DAG-level
/// per-task retry policy, not the HTTP pipeline's own retry manager.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

/// Maps tool names to their implementations.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

/// How a failed task in a level affects later levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    Continue,
    Stop,
}

impl Default for FailureMode {
    fn default() -> Self {
        Self::Continue
    }
}

/// Executor-wide defaults; a task's own `timeout_ms`/`retry_policy` override
/// these per-task.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub max_concurrent: usize,
    pub default_timeout_ms: u64,
    pub failure_mode: FailureMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            default_timeout_ms: 300_000,
            failure_mode: FailureMode::Continue,
        }
    }
}

pub struct DagExecutor {
    registry: ToolRegistry,
    config: ExecutorConfig,
}

impl DagExecutor {
    pub fn new(registry: ToolRegistry, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    #[instrument(skip(self, dag), fields(tasks = dag.nodes.len()))]
    pub async fn execute(&self, dag: Dag) -> ExecutionResult {
        let start_time = Utc::now();
        let execution_id = Uuid::new_v4().to_string();
        let mut results: HashMap<String, TaskResult> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));

        let mut stopped_after_level: Option<usize> = None;

        for (level_index, level) in dag.levels.iter().enumerate() {
            let mut handles = Vec::with_capacity(level.len());

            for task_id in level {
                let node = &dag.nodes[task_id];
                let task = node.task.clone();
                let tool = self.registry.get(&task.tool);
                let substituted = resolve(&task.params, &results);
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                let default_timeout = self.config.default_timeout_ms;

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    run_task(tool, task, substituted, default_timeout).await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(result) => {
                        results.insert(result.task_id.clone(), result);
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "task join failed");
                    }
                }
            }

            let level_failed = level
                .iter()
                .any(|id| matches!(results.get(id).map(|r| r.status), Some(TaskStatus::Failed)));

            if level_failed && self.config.failure_mode == FailureMode::Stop {
                stopped_after_level = Some(level_index);
                break;
            }
        }

        if let Some(stopped_at) = stopped_after_level {
            for level in dag.levels.iter().skip(stopped_at + 1) {
                for task_id in level {
                    results.insert(task_id.clone(), TaskResult::skipped(task_id));
                }
            }
        }

        let end_time = Utc::now();
        let summary = summarize(&results, dag.nodes.len());
        let status = if summary.failed == 0 {
            ExecutionStatus::Success
        } else if summary.succeeded == 0 {
            ExecutionStatus::Failure
        } else {
            ExecutionStatus::Partial
        };

        let edges: Vec<DagEdge> = dag.edges.clone();

        ExecutionResult {
            execution_id,
            status,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds(),
            tasks: results,
            summary,
            dag: DagDescription {
                levels: dag.levels,
                edges,
            },
        }
    }
}

fn summarize(results: &HashMap<String, TaskResult>, total: usize) -> ExecutionSummary {
    let mut succeeded = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for r in results.values() {
        match r.status {
            TaskStatus::Success => succeeded += 1,
            TaskStatus::Failed => failed += 1,
            TaskStatus::Skipped => skipped += 1,
        }
    }
    ExecutionSummary {
        total,
        succeeded,
        failed,
        skipped,
    }
}

async fn run_task(
    tool: Option<Arc<dyn Tool>>,
    task: Task,
    params: HashMap<String, Value>,
    default_timeout_ms: u64,
) -> TaskResult {
    let start = Utc::now();

    let Some(tool) = tool else {
        let end = Utc::now();
        return TaskResult {
            task_id: task.id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(TaskError {
                code: "TOOL_NOT_FOUND".to_string(),
                message: format!("no tool registered for '{}'", task.tool),
                retryable: false,
            }),
            start,
            end,
            duration_ms: (end - start).num_milliseconds(),
        };
    };

    let timeout_ms = task.timeout_ms.unwrap_or(default_timeout_ms);
    let outcome = invoke_with_retry(&tool, &params, task.retry_policy.as_ref(), timeout_ms).await;
    let end = Utc::now();
    let duration_ms = (end - start).num_milliseconds();

    match outcome {
        Ok(value) => TaskResult {
            task_id: task.id,
            status: TaskStatus::Success,
            result: Some(value),
            error: None,
            start,
            end,
            duration_ms,
        },
        Err(error) => TaskResult {
            task_id: task.id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error),
            start,
            end,
            duration_ms,
        },
    }
}

async fn invoke_with_retry(
    tool: &Arc<dyn Tool>,
    params: &HashMap<String, Value>,
    retry_policy: Option<&super::model::RetryPolicy>,
    timeout_ms: u64,
) -> Result<Value, TaskError> {
    let max_attempts = retry_policy.map(|p| p.max_attempts).unwrap_or(1).max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let call = tool.invoke(params.clone());
        let outcome = tokio_timeout(Duration::from_millis(timeout_ms), call).await;

        let tool_result = match outcome {
            Ok(inner) => inner,
            Err(_) => {
                return Err(TaskError {
                    code: "TIMEOUT".to_string(),
                    message: format!("task timed out after {timeout_ms}ms"),
                    retryable: false,
                });
            }
        };

        match tool_result {
            Ok(value) => return Ok(value),
            Err(tool_err) => {
                if attempt >= max_attempts || !tool_err.retryable {
                    return Err(TaskError {
                        code: tool_err.code,
                        message: tool_err.message,
                        retryable: tool_err.retryable,
                    });
                }
                let delay_ms = retry_delay_ms(retry_policy.unwrap(), attempt);
                debug!(attempt, delay_ms, "retrying task after tool error");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

fn retry_delay_ms(policy: &super::model::RetryPolicy, attempt: u32) -> u64 {
    match policy.backoff {
        BackoffKind::Fixed => policy.initial_delay_ms,
        BackoffKind::Exponential => policy.initial_delay_ms.saturating_mul(1u64 << attempt.min(16)),
    }
}
