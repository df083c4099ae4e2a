use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::payment::ProcessorChoice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Redis,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            "redis" | "valkey" => Ok(StorageBackend::Redis),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub storage_backend: StorageBackend,
    pub redis_url: String,
    pub default_processor_url: String,
    pub fallback_processor_url: String,
    pub worker_concurrency: usize,
    pub queue_capacity: usize,
    pub queue_receive_timeout: Duration,
    pub payment_timeout: Duration,
    pub health_timeout: Duration,
    pub health_check_cycle_interval: Duration,
    pub health_freshness_window: Duration,
    pub health_lock_lease: Duration,
    pub error_sleep: Duration,
}

fn env_or<T>(key: &str, default: &str) -> Result<T, Box<dyn std::error::Error + Send + Sync>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| format!("invalid value for {key} ({raw}): {e}").into())
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let config = Self {
            port: env_or("PORT", "9999")?,
            storage_backend: env_or("STORAGE_BACKEND", "memory")?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            default_processor_url: std::env::var("DEFAULT_PROCESSOR_URL")
                .unwrap_or_else(|_| "http://payment-processor-default:8080".to_string()),
            fallback_processor_url: std::env::var("FALLBACK_PROCESSOR_URL")
                .unwrap_or_else(|_| "http://payment-processor-fallback:8080".to_string()),
            worker_concurrency: env_or("WORKER_CONCURRENCY", "20")?,
            queue_capacity: env_or("QUEUE_CAPACITY", "50000")?,
            queue_receive_timeout: Duration::from_millis(env_or(
                "QUEUE_RECEIVE_TIMEOUT_MILLIS",
                "1000",
            )?),
            payment_timeout: Duration::from_millis(env_or("PAYMENT_TIMEOUT_MILLIS", "500")?),
            health_timeout: Duration::from_millis(env_or("HEALTH_TIMEOUT_MILLIS", "300")?),
            health_check_cycle_interval: Duration::from_secs(env_or(
                "HEALTH_CHECK_CYCLE_INTERVAL_SECS",
                "5",
            )?),
            health_freshness_window: Duration::from_millis(env_or(
                "HEALTH_FRESHNESS_MILLIS",
                "5000",
            )?),
            health_lock_lease: Duration::from_millis(env_or("HEALTH_LOCK_LEASE_MILLIS", "10000")?),
            error_sleep: Duration::from_millis(env_or("ERROR_SLEEP_MILLIS", "0")?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.worker_concurrency == 0 {
            return Err("Worker concurrency must be greater than 0".into());
        }

        if self.queue_capacity == 0 {
            return Err("Queue capacity must be greater than 0".into());
        }

        if self.queue_receive_timeout.is_zero() {
            return Err("Queue receive timeout must be greater than 0".into());
        }

        if self.payment_timeout.is_zero() || self.health_timeout.is_zero() {
            return Err("HTTP timeouts must be greater than 0".into());
        }

        if self.health_check_cycle_interval.is_zero() {
            return Err("Health check cycle interval must be greater than 0".into());
        }

        if self.health_lock_lease.is_zero() {
            return Err("Health lock lease must be greater than 0".into());
        }

        if self.default_processor_url.is_empty() {
            return Err("Default processor URL cannot be empty".into());
        }

        if self.fallback_processor_url.is_empty() {
            return Err("Fallback processor URL cannot be empty".into());
        }

        if self.storage_backend == StorageBackend::Redis && self.redis_url.is_empty() {
            return Err("Redis URL cannot be empty when STORAGE_BACKEND=redis".into());
        }

        Ok(())
    }

    pub fn processor_url(&self, processor: ProcessorChoice) -> &str {
        match processor {
            ProcessorChoice::Default => &self.default_processor_url,
            ProcessorChoice::Fallback => &self.fallback_processor_url,
        }
    }

    pub fn payments_url(&self, processor: ProcessorChoice) -> String {
        format!("{}/payments", self.processor_url(processor).trim_end_matches('/'))
    }

    pub fn health_url(&self, processor: ProcessorChoice) -> String {
        format!(
            "{}/payments/service-health",
            self.processor_url(processor).trim_end_matches('/')
        )
    }

    pub fn log_configuration(&self) {
        info!(
            port = self.port,
            storage_backend = ?self.storage_backend,
            redis_url = %self.redis_url,
            default_processor_url = %self.default_processor_url,
            fallback_processor_url = %self.fallback_processor_url,
            worker_concurrency = self.worker_concurrency,
            queue_capacity = self.queue_capacity,
            queue_receive_timeout = ?self.queue_receive_timeout,
            payment_timeout = ?self.payment_timeout,
            health_timeout = ?self.health_timeout,
            health_check_cycle_interval = ?self.health_check_cycle_interval,
            health_freshness_window = ?self.health_freshness_window,
            health_lock_lease = ?self.health_lock_lease,
            error_sleep = ?self.error_sleep,
            "Gateway configuration"
        );
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 9999,
            storage_backend: StorageBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            default_processor_url: "http://payment-processor-default:8080".to_string(),
            fallback_processor_url: "http://payment-processor-fallback:8080".to_string(),
            worker_concurrency: 20,
            queue_capacity: 50_000,
            queue_receive_timeout: Duration::from_millis(1000),
            payment_timeout: Duration::from_millis(500),
            health_timeout: Duration::from_millis(300),
            health_check_cycle_interval: Duration::from_secs(5),
            health_freshness_window: Duration::from_millis(5000),
            health_lock_lease: Duration::from_millis(10_000),
            error_sleep: Duration::ZERO,
        }
    }
}
