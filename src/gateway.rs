use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, StoreError, ValidationError};
use crate::health_coordinator::HealthCoordinator;
use crate::http_client::HttpClient;
use crate::payment::{PaymentRecord, PaymentSummary};
use crate::storage::Storage;
use crate::worker::{DispatchWorkerPool, PaymentDispatcher};

struct Background {
    workers: DispatchWorkerPool,
    health_loop: JoinHandle<()>,
}

/// Front door of the gateway: admission, reporting and purge, plus the
/// lifecycle of the dispatch workers and the health check loop.
pub struct PaymentGateway {
    storage: Storage,
    coordinator: Arc<HealthCoordinator>,
    shutdown_tx: watch::Sender<bool>,
    background: Mutex<Option<Background>>,
}

impl PaymentGateway {
    /// Builds the gateway and spawns its background tasks. Must be called
    /// from within a tokio runtime.
    pub fn start(
        storage: Storage,
        http_client: Arc<dyn HttpClient>,
        config: GatewayConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let coordinator = Arc::new(HealthCoordinator::new(
            storage.health.clone(),
            http_client.clone(),
            config.clone(),
        ));
        let dispatcher = Arc::new(PaymentDispatcher::new(
            storage.queue.clone(),
            storage.metrics.clone(),
            coordinator.clone(),
            http_client,
            config.clone(),
            shutdown_rx.clone(),
        ));

        let workers = DispatchWorkerPool::spawn(dispatcher, config.worker_concurrency);
        let health_loop = tokio::spawn(coordinator.clone().run(shutdown_rx));

        info!(
            workers = config.worker_concurrency,
            owner = %coordinator.owner(),
            "Payment gateway started"
        );

        Arc::new(Self {
            storage,
            coordinator,
            shutdown_tx,
            background: Mutex::new(Some(Background {
                workers,
                health_loop,
            })),
        })
    }

    pub fn coordinator(&self) -> &Arc<HealthCoordinator> {
        &self.coordinator
    }

    #[instrument(skip_all, fields(correlation_id = %record.correlation_id()))]
    pub async fn submit(&self, record: PaymentRecord) -> Result<(), GatewayError> {
        if record.amount() <= Decimal::ZERO || record.amount_cents() <= 0 {
            return Err(ValidationError::NonPositiveAmount(record.amount()).into());
        }

        self.storage.queue.enqueue(record).await.map_err(|e| {
            match &e {
                StoreError::QueueFull => warn!("Admission queue full, rejecting payment"),
                other => error!(error = %other, "Failed to enqueue payment"),
            }
            GatewayError::from(e)
        })
    }

    /// Totals per processor. Without bounds the running totals are used;
    /// with at least one bound the ledger is scanned, a missing bound
    /// leaving that side open. The HTTP layer only ever passes both or none.
    pub async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PaymentSummary, StoreError> {
        if from.is_none() && to.is_none() {
            return self.storage.metrics.summary().await;
        }

        let from_millis = from.map_or(i64::MIN, |t| t.timestamp_millis());
        let to_millis = to.map_or(i64::MAX, |t| t.timestamp_millis());
        self.storage
            .metrics
            .summary_in_range(from_millis, to_millis)
            .await
    }

    /// Clears queued payments, recorded totals and the health decision.
    /// Safe to repeat.
    #[instrument(skip(self))]
    pub async fn purge(&self) -> Result<(), StoreError> {
        self.storage.queue.purge().await?;
        self.storage.metrics.purge().await?;
        self.storage.health.purge().await?;
        self.coordinator.reset();

        info!("Payment data purged");
        Ok(())
    }

    /// Stops the workers after their current iteration, stops the health
    /// loop and gives back the probe lease. Later calls do nothing.
    pub async fn shutdown(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(background) = background else {
            return;
        };

        info!("Shutting down payment gateway");
        // receivers live in the spawned tasks, so send only fails if they are all gone
        let _ = self.shutdown_tx.send(true);

        background.workers.join().await;
        if let Err(e) = background.health_loop.await {
            error!(error = %e, "Health check loop panicked");
        }
        self.coordinator.release().await;

        info!("Payment gateway stopped");
    }
}
