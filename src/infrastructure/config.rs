//! Layered runtime configuration: compiled-in defaults, an optional YAML
//! file, then `RUNTIME_`-prefixed environment variables (§6).

use std::env;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::dag::{ExecutorConfig, FailureMode};
use crate::error::ConfigError;
use crate::http::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "taskforge.sqlite".to_string(),
            max_connections: 10,
            idle_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file_directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagExecutorConfigSection {
    pub max_concurrent: usize,
    pub default_timeout_ms: u64,
    pub failure_mode: FailureMode,
}

impl Default for DagExecutorConfigSection {
    fn default() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            max_concurrent: defaults.max_concurrent,
            default_timeout_ms: defaults.default_timeout_ms,
            failure_mode: defaults.failure_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpPipelineConfigSection {
    pub retry: RetryConfig,
    pub default_bucket_capacity: u64,
    pub default_bucket_refill_rate: f64,
}

impl Default for HttpPipelineConfigSection {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            default_bucket_capacity: 10,
            default_bucket_refill_rate: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfigSection {
    pub tick_interval_ms: u64,
    pub max_schedules: usize,
}

impl Default for SchedulerConfigSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            max_schedules: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub dag: DagExecutorConfigSection,
    pub http: HttpPipelineConfigSection,
    pub scheduler: SchedulerConfigSection,
}

impl RuntimeConfig {
    /// Merge compiled-in defaults, an optional YAML file (default
    /// `./config/runtime.yaml`, override via `RUNTIME_CONFIG_PATH`), and
    /// `RUNTIME_`-prefixed env vars with `__` as the nesting separator.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("RUNTIME_CONFIG_PATH").unwrap_or_else(|_| "./config/runtime.yaml".to_string());

        let figment = Figment::new()
            .merge(Serialized::defaults(RuntimeConfig::default()))
            .merge(Yaml::file(config_path))
            .merge(Env::prefixed("RUNTIME_").split("__"));

        figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file_or_env() {
        temp_env::with_vars_unset(["RUNTIME_CONFIG_PATH"], || {
            let config = RuntimeConfig::load().expect("defaults alone must be sufficient");
            assert_eq!(config.dag.max_concurrent, 5);
            assert_eq!(config.logging.level, "info");
        });
    }

    #[test]
    fn env_override_wins_over_defaults() {
        temp_env::with_var("RUNTIME_DATABASE__MAX_CONNECTIONS", Some("42"), || {
            let config = RuntimeConfig::load().expect("env override must parse");
            assert_eq!(config.database.max_connections, 42);
        });
    }
}
