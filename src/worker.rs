use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::error::DeliveryError;
use crate::health_coordinator::HealthCoordinator;
use crate::http_client::HttpClient;
use crate::metrics::MetricsStore;
use crate::payment::{LedgerEntry, PaymentRecord, ProcessorChoice};
use crate::queue::PaymentQueue;

const STORE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
struct ProcessorPaymentRequest<'a> {
    #[serde(rename = "correlationId")]
    correlation_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    #[serde(rename = "requestedAt")]
    requested_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered(ProcessorChoice),
    Requeued,
    /// Shutdown arrived while the queue was still refusing the record back.
    Lost,
}

/// Takes one record at a time from the admission queue and forwards it to
/// whichever processor the health coordinator currently prefers.
pub struct PaymentDispatcher {
    queue: Arc<dyn PaymentQueue>,
    metrics: Arc<dyn MetricsStore>,
    coordinator: Arc<HealthCoordinator>,
    http_client: Arc<dyn HttpClient>,
    config: GatewayConfig,
    shutdown: watch::Receiver<bool>,
}

impl PaymentDispatcher {
    pub fn new(
        queue: Arc<dyn PaymentQueue>,
        metrics: Arc<dyn MetricsStore>,
        coordinator: Arc<HealthCoordinator>,
        http_client: Arc<dyn HttpClient>,
        config: GatewayConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            metrics,
            coordinator,
            http_client,
            config,
            shutdown,
        }
    }

    #[instrument(
        skip_all,
        fields(
            correlation_id = %record.correlation_id(),
            processor = %processor,
            response_time_ms = tracing::field::Empty
        )
    )]
    pub async fn deliver(
        &self,
        record: &PaymentRecord,
        processor: ProcessorChoice,
        requested_at: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        let body = serde_json::to_string(&ProcessorPaymentRequest {
            correlation_id: record.correlation_id(),
            amount: record.amount(),
            requested_at: requested_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        })?;

        let url = self.config.payments_url(processor);
        let timeout = self.config.payment_timeout;
        let start = Instant::now();

        let result = time::timeout(timeout, self.http_client.post_json(&url, body, timeout)).await;
        tracing::Span::current().record("response_time_ms", start.elapsed().as_millis());

        match result {
            Ok(Ok(response)) if response.is_success => Ok(()),
            Ok(Ok(response)) => Err(DeliveryError::Status(response.status_code())),
            Ok(Err(e)) => Err(DeliveryError::Transport(e.to_string())),
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }

    /// One attempt for one record. Never fails: a record that could not be
    /// delivered goes back to the queue.
    pub async fn process(&self, record: PaymentRecord) -> DispatchOutcome {
        let processor = self.coordinator.active_processor();
        let requested_at = Utc::now();

        match self.deliver(&record, processor, requested_at).await {
            Ok(()) => {
                let entry = LedgerEntry::new(&record, processor, requested_at.timestamp_millis());
                if let Err(e) = self.metrics.record(entry).await {
                    // the processor already has it; requeueing would deliver twice
                    error!(
                        correlation_id = %record.correlation_id(),
                        processor = %processor,
                        error = %e,
                        "Payment delivered but could not be recorded"
                    );
                }
                DispatchOutcome::Delivered(processor)
            }
            Err(e) => {
                debug!(
                    correlation_id = %record.correlation_id(),
                    processor = %processor,
                    error = %e,
                    "Delivery failed, requeueing"
                );
                self.requeue(record).await
            }
        }
    }

    /// Puts a failed record back, retrying for as long as the queue refuses
    /// it. Only a shutdown ends the retries.
    async fn requeue(&self, record: PaymentRecord) -> DispatchOutcome {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let err = match self.queue.requeue(record.clone()).await {
                Ok(()) => {
                    if !self.config.error_sleep.is_zero() {
                        time::sleep(self.config.error_sleep).await;
                    }
                    return DispatchOutcome::Requeued;
                }
                Err(e) => e,
            };

            let stopping = *self.shutdown.borrow();
            if stopping {
                error!(
                    correlation_id = %record.correlation_id(),
                    amount = %record.amount(),
                    attempt,
                    error = %err,
                    "Shutting down before the payment could be requeued"
                );
                return DispatchOutcome::Lost;
            }

            warn!(
                correlation_id = %record.correlation_id(),
                attempt,
                error = %err,
                "Requeue failed, retrying"
            );
            time::sleep(STORE_RETRY_DELAY).await;
        }
    }

    /// Worker loop. Checks the shutdown flag between iterations so an item
    /// already taken from the queue is always finished.
    #[instrument(skip(self), fields(processed_count = tracing::field::Empty))]
    pub async fn run_worker(self: Arc<Self>, worker_id: usize) {
        let mut processed_count: u64 = 0;

        loop {
            let stopping = *self.shutdown.borrow();
            if stopping {
                break;
            }

            match self.queue.dequeue(self.config.queue_receive_timeout).await {
                Ok(Some(record)) => {
                    if let DispatchOutcome::Delivered(_) = self.process(record).await {
                        processed_count += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id, error = %e, "Failed to read from admission queue");
                    time::sleep(STORE_RETRY_DELAY).await;
                }
            }
        }

        tracing::Span::current().record("processed_count", processed_count);
        debug!(worker_id, processed_count, "Worker stopped");
    }
}

/// A fixed set of workers all competing for the same queue.
pub struct DispatchWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl DispatchWorkerPool {
    /// Workers stop once the dispatcher's shutdown flag is raised.
    pub fn spawn(dispatcher: Arc<PaymentDispatcher>, workers: usize) -> Self {
        let handles = (0..workers)
            .map(|worker_id| tokio::spawn(Arc::clone(&dispatcher).run_worker(worker_id)))
            .collect();

        info!(workers, "Dispatch workers started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to finish its current iteration and exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatch worker panicked");
            }
        }
    }
}
