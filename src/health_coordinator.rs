use chrono::Utc;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::health_storage::HealthStorage;
use crate::http_client::HttpClient;
use crate::payment::ProcessorChoice;

#[derive(Debug, Deserialize)]
struct ServiceHealthResponse {
    failing: bool,
    #[serde(rename = "minResponseTime")]
    #[allow(dead_code)]
    min_response_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    pub active_processor: ProcessorChoice,
    pub last_checked_at_millis: i64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            active_processor: ProcessorChoice::Default,
            last_checked_at_millis: 0,
        }
    }
}

/// What one probe cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// This instance held the lease and probed. `None` means neither
    /// processor was healthy and the previous decision was kept.
    Leader(Option<ProcessorChoice>),
    /// Another instance is probing; the published decision (if any) was adopted.
    Follower(Option<ProcessorChoice>),
    /// The shared store could not be reached.
    Skipped,
}

/// Owns the decision of which processor the workers deliver to.
///
/// Probing is arbitrated through a short lease in [`HealthStorage`] so only
/// one gateway instance calls the upstream health endpoints at a time; the
/// others adopt the decision it publishes. Readers only ever see the cached
/// value and never wait for a probe.
pub struct HealthCoordinator {
    storage: Arc<dyn HealthStorage>,
    http_client: Arc<dyn HttpClient>,
    config: GatewayConfig,
    owner: String,
    state: RwLock<HealthState>,
    refreshing: AtomicBool,
}

impl HealthCoordinator {
    pub fn new(
        storage: Arc<dyn HealthStorage>,
        http_client: Arc<dyn HttpClient>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            storage,
            http_client,
            config,
            owner: Uuid::new_v4().to_string(),
            state: RwLock::new(HealthState::default()),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Lease owner token of this instance.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> HealthState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cached_processor(&self) -> ProcessorChoice {
        self.state().active_processor
    }

    pub fn is_stale(&self) -> bool {
        let age = Utc::now().timestamp_millis() - self.state().last_checked_at_millis;
        age >= self.config.health_freshness_window.as_millis() as i64
    }

    /// Cached decision for the dispatch path. A stale cache schedules a
    /// background cycle but the current value is returned immediately.
    pub fn active_processor(self: &Arc<Self>) -> ProcessorChoice {
        let processor = self.cached_processor();
        if self.is_stale() {
            self.trigger_refresh();
        }
        processor
    }

    fn trigger_refresh(self: &Arc<Self>) {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return;
        }
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run_cycle().await;
            coordinator.refreshing.store(false, Ordering::Release);
        });
    }

    /// Runs one cycle unless another one of this instance is already in flight.
    pub async fn refresh(&self) -> Option<CycleOutcome> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return None;
        }
        let outcome = self.run_cycle().await;
        self.refreshing.store(false, Ordering::Release);
        Some(outcome)
    }

    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let acquired = match self
            .storage
            .try_acquire_lock(&self.owner, self.config.health_lock_lease)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(error = %e, "Could not reach health lock, keeping cached decision");
                return CycleOutcome::Skipped;
            }
        };

        if !acquired {
            return self.follow().await;
        }

        let decision = self.lead().await;
        if let Err(e) = self.storage.release_lock(&self.owner).await {
            warn!(error = %e, "Failed to release health lock, lease will expire");
        }
        CycleOutcome::Leader(decision)
    }

    async fn lead(&self) -> Option<ProcessorChoice> {
        let (default_healthy, fallback_healthy) = tokio::join!(
            self.probe(ProcessorChoice::Default),
            self.probe(ProcessorChoice::Fallback)
        );

        let decision = if default_healthy {
            Some(ProcessorChoice::Default)
        } else if fallback_healthy {
            Some(ProcessorChoice::Fallback)
        } else {
            None
        };

        match decision {
            Some(processor) => {
                let previous = self.adopt(processor);
                if previous != processor {
                    info!(from = %previous, to = %processor, "Active processor changed");
                }
                if let Err(e) = self.storage.publish_processor(processor).await {
                    warn!(error = %e, processor = %processor, "Failed to publish health decision");
                }
            }
            None => {
                self.touch();
                warn!(
                    kept = %self.cached_processor(),
                    "Both processors unhealthy, keeping previous decision"
                );
            }
        }

        decision
    }

    async fn follow(&self) -> CycleOutcome {
        match self.storage.published_processor().await {
            Ok(Some(processor)) => {
                self.adopt(processor);
                debug!(processor = %processor, "Adopted published health decision");
                CycleOutcome::Follower(Some(processor))
            }
            Ok(None) => {
                self.touch();
                CycleOutcome::Follower(None)
            }
            Err(e) => {
                warn!(error = %e, "Could not read published health decision");
                CycleOutcome::Skipped
            }
        }
    }

    /// Healthy means HTTP 200 and a payload that does not report failing.
    /// Errors and timeouts count as unhealthy.
    pub async fn probe(&self, processor: ProcessorChoice) -> bool {
        let url = self.config.health_url(processor);
        let timeout = self.config.health_timeout;

        let response = match time::timeout(timeout, self.http_client.get(&url, timeout)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(processor = %processor, error = %e, "Health probe failed");
                return false;
            }
            Err(_) => {
                debug!(processor = %processor, "Health probe timed out");
                return false;
            }
        };

        if response.status_code() != 200 {
            debug!(
                processor = %processor,
                status = response.status_code(),
                "Health probe returned non-200"
            );
            return false;
        }

        match response.json::<ServiceHealthResponse>() {
            Ok(health) => !health.failing,
            Err(e) => {
                debug!(processor = %processor, error = %e, "Unparseable health payload");
                false
            }
        }
    }

    fn adopt(&self, processor: ProcessorChoice) -> ProcessorChoice {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = state.active_processor;
        *state = HealthState {
            active_processor: processor,
            last_checked_at_millis: Utc::now().timestamp_millis(),
        };
        previous
    }

    fn touch(&self) {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.last_checked_at_millis = Utc::now().timestamp_millis();
    }

    /// Back to the initial decision: default processor, never checked.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = HealthState::default();
    }

    /// Gives the lease back if this instance still holds it.
    pub async fn release(&self) {
        if let Err(e) = self.storage.release_lock(&self.owner).await {
            warn!(error = %e, "Failed to release health lock on shutdown");
        }
    }

    /// Periodic probe loop. Exits when `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.health_check_cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(outcome) = self.refresh().await {
                        debug!(?outcome, "Health check cycle completed");
                    }
                }
                changed = shutdown.changed() => {
                    let stopping = changed.is_err() || *shutdown.borrow();
                    if stopping {
                        break;
                    }
                }
            }
        }

        debug!("Health check loop stopped");
    }
}
