//! Crate-wide error hierarchy.
//!
//! Every component returns its own narrow error enum; `DomainError` unifies
//! them behind one `DomainResult<T>` so the binary and cross-component glue
//! code don't have to match on five different error types.

use thiserror::Error;

use crate::dag::DagError;
use crate::http::HttpError;
use crate::http::oauth::OAuthError;
use crate::scheduler::SchedulerError;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Crate-wide result alias.
pub type DomainResult<T> = Result<T, DomainError>;

/// Configuration loading / validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
