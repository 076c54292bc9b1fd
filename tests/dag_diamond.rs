//! End-to-end diamond DAG scenario (S1): four tasks, all succeed, the
//! levels and summary match the expected shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use taskforge::dag::{DagBuilder, DagExecutor, ExecutionStatus, ExecutorConfig, Task, Tool, ToolError, ToolRegistry};

struct Ok200;

#[async_trait]
impl Tool for Ok200 {
    async fn invoke(&self, _params: HashMap<String, Value>) -> Result<Value, ToolError> {
        Ok(json!({"ok": true}))
    }
}

fn task(id: &str, depends_on: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        tool: "ok".to_string(),
        params: HashMap::new(),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        timeout_ms: None,
        retry_policy: None,
    }
}

#[tokio::test]
async fn diamond_dag_all_succeed_with_expected_levels() {
    let tasks = vec![task("A", &[]), task("B", &["A"]), task("C", &["A"]), task("D", &["B", "C"])];
    let dag = DagBuilder::build(tasks).expect("diamond DAG is acyclic");

    assert_eq!(
        dag.levels,
        vec![vec!["A".to_string()], vec!["B".to_string(), "C".to_string()], vec!["D".to_string()]]
    );

    let mut registry = ToolRegistry::new();
    registry.register("ok", Arc::new(Ok200));
    let executor = DagExecutor::new(registry, ExecutorConfig::default());

    let result = executor.execute(dag).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.summary.succeeded, 4);
    assert_eq!(result.summary.failed, 0);
    assert_eq!(result.summary.skipped, 0);
    assert_eq!(result.dag.edges.len(), 4);
}
