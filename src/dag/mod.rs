//! Parallel DAG execution engine: build a validated, level-ordered graph
//! from a flat task list, then execute it against a tool registry with a
//! bounded per-level concurrency pool.

pub mod builder;
pub mod executor;
pub mod model;
pub mod substitution;

pub use builder::{Dag, DagBuilder, DagError};
pub use executor::{DagExecutor, ExecutorConfig, FailureMode, Tool, ToolError, ToolRegistry};
pub use model::{
    BackoffKind, DagDescription, DagEdge, DagNode, ExecutionResult, ExecutionStatus,
    ExecutionSummary, RetryPolicy, Task, TaskError, TaskResult, TaskStatus,
};
