use std::sync::Arc;

use crate::config::{GatewayConfig, StorageBackend};
use crate::error::StoreError;
use crate::health_storage::{HealthStorage, MemoryHealthStorage};
use crate::metrics::{MemoryMetricsStore, MetricsStore};
use crate::queue::{MemoryPaymentQueue, PaymentQueue};
use crate::redis_store::RedisStore;

/// The three shared resources of a gateway instance, backed either by process
/// memory or by a store shared between instances.
#[derive(Clone)]
pub struct Storage {
    pub queue: Arc<dyn PaymentQueue>,
    pub metrics: Arc<dyn MetricsStore>,
    pub health: Arc<dyn HealthStorage>,
}

impl Storage {
    pub fn in_memory(queue_capacity: usize) -> Self {
        Self {
            queue: Arc::new(MemoryPaymentQueue::new(queue_capacity)),
            metrics: Arc::new(MemoryMetricsStore::new()),
            health: Arc::new(MemoryHealthStorage::new()),
        }
    }

    pub async fn redis(redis_url: &str, queue_capacity: usize) -> Result<Self, StoreError> {
        let store = Arc::new(RedisStore::connect(redis_url, queue_capacity).await?);
        Ok(Self {
            queue: store.clone(),
            metrics: store.clone(),
            health: store,
        })
    }

    pub async fn from_config(config: &GatewayConfig) -> Result<Self, StoreError> {
        match config.storage_backend {
            StorageBackend::Memory => Ok(Self::in_memory(config.queue_capacity)),
            StorageBackend::Redis => Self::redis(&config.redis_url, config.queue_capacity).await,
        }
    }
}
