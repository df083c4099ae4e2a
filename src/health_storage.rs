use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::payment::ProcessorChoice;

/// Shared state behind the health coordinator: the probing lease and the
/// last published decision.
#[async_trait]
pub trait HealthStorage: Send + Sync {
    /// Acquire-if-absent with expiry. Never waits for a held lease.
    async fn try_acquire_lock(&self, owner: &str, lease: Duration) -> Result<bool, StoreError>;

    /// Releases the lease only if `owner` still holds it.
    async fn release_lock(&self, owner: &str) -> Result<(), StoreError>;

    async fn publish_processor(&self, processor: ProcessorChoice) -> Result<(), StoreError>;

    async fn published_processor(&self) -> Result<Option<ProcessorChoice>, StoreError>;

    /// Forgets the published decision. A held lease is left to expire.
    async fn purge(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct LeaseEntry {
    owner: String,
    acquired_at: Instant,
    lease: Duration,
}

impl LeaseEntry {
    fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.lease
    }
}

#[derive(Default)]
struct HealthRecord {
    lock: Option<LeaseEntry>,
    published: Option<ProcessorChoice>,
}

#[derive(Default)]
pub struct MemoryHealthStorage {
    state: Mutex<HealthRecord>,
}

impl MemoryHealthStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HealthRecord) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }
}

#[async_trait]
impl HealthStorage for MemoryHealthStorage {
    async fn try_acquire_lock(&self, owner: &str, lease: Duration) -> Result<bool, StoreError> {
        Ok(self.with_state(|state| {
            if let Some(entry) = &state.lock {
                if !entry.is_expired() {
                    return false;
                }
            }
            state.lock = Some(LeaseEntry {
                owner: owner.to_string(),
                acquired_at: Instant::now(),
                lease,
            });
            true
        }))
    }

    async fn release_lock(&self, owner: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            if state.lock.as_ref().is_some_and(|entry| entry.owner == owner) {
                state.lock = None;
            }
        });
        Ok(())
    }

    async fn publish_processor(&self, processor: ProcessorChoice) -> Result<(), StoreError> {
        self.with_state(|state| state.published = Some(processor));
        Ok(())
    }

    async fn published_processor(&self) -> Result<Option<ProcessorChoice>, StoreError> {
        Ok(self.with_state(|state| state.published))
    }

    async fn purge(&self) -> Result<(), StoreError> {
        self.with_state(|state| state.published = None);
        Ok(())
    }
}
