use std::env;

use crate::domain::entities::{
    BackoffPolicy, CompletedRetention, FailedRetention, JobOptions,
};

/// Environment-level configuration. Broker endpoint, credentials, and the
/// transport security flag all travel inside `DATABASE_URL`.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_concurrency: usize,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub completed_retention_secs: i64,
    pub completed_retention_count: i64,
    pub failed_retention_secs: i64,
    pub stall_check_interval_ms: i64,
    pub max_stalled_count: i32,
    pub registration_prefix: String,
    pub otel_exporter_endpoint: Option<String>,
    pub service_name: String,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://certmill.db?mode=rwc".to_string());

        let worker_concurrency = env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidConcurrency)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        let max_attempts = env::var("MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let backoff_base_ms = env::var("BACKOFF_BASE_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2_000);

        let completed_retention_secs = env::var("COMPLETED_RETENTION_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3_600);

        let completed_retention_count = env::var("COMPLETED_RETENTION_COUNT")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1_000);

        let failed_retention_secs = env::var("FAILED_RETENTION_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86_400);

        let stall_check_interval_ms = env::var("STALL_CHECK_INTERVAL_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .unwrap_or(30_000);

        let max_stalled_count = env::var("MAX_STALLED_COUNT")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        let registration_prefix =
            env::var("REGISTRATION_PREFIX").unwrap_or_else(|_| "ILC".to_string());

        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "certmill".to_string());

        let metrics_port = env::var("METRICS_PORT")
            .unwrap_or_else(|_| "9000".to_string())
            .parse()
            .unwrap_or(9000);

        Ok(Config {
            database_url,
            worker_concurrency,
            max_attempts,
            backoff_base_ms,
            completed_retention_secs,
            completed_retention_count,
            failed_retention_secs,
            stall_check_interval_ms,
            max_stalled_count,
            registration_prefix,
            otel_exporter_endpoint,
            service_name,
            metrics_port,
        })
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            max_attempts: self.max_attempts,
            backoff: BackoffPolicy::new(self.backoff_base_ms),
            max_stalled_count: self.max_stalled_count,
            stall_check_interval_ms: self.stall_check_interval_ms,
            completed_retention: CompletedRetention {
                max_age_secs: self.completed_retention_secs,
                max_count: self.completed_retention_count,
            },
            failed_retention: FailedRetention {
                max_age_secs: self.failed_retention_secs,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("WORKER_CONCURRENCY must be a positive integer")]
    InvalidConcurrency,
}
