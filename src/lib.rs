//! Universal automation runtime: a DAG execution engine, an HTTP request
//! pipeline, and a persistent cron/interval/one-shot scheduler.

pub mod credentials;
pub mod dag;
pub mod error;
pub mod http;
pub mod infrastructure;
pub mod scheduler;

pub use error::{DomainError, DomainResult};
