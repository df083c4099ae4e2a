use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::error::StoreError;
use crate::payment::PaymentRecord;

/// Bounded admission queue shared by the accept path and the worker pool.
#[async_trait]
pub trait PaymentQueue: Send + Sync {
    /// Fails fast with [`StoreError::QueueFull`] when at capacity.
    async fn enqueue(&self, record: PaymentRecord) -> Result<(), StoreError>;

    /// Waits up to `wait` for a record. `Ok(None)` means nothing arrived in time.
    async fn dequeue(&self, wait: Duration) -> Result<Option<PaymentRecord>, StoreError>;

    /// Re-admits a record whose delivery failed. Never rejected for capacity.
    async fn requeue(&self, record: PaymentRecord) -> Result<(), StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    async fn purge(&self) -> Result<(), StoreError>;
}

pub struct MemoryPaymentQueue {
    items: Mutex<VecDeque<PaymentRecord>>,
    available: Notify,
    capacity: usize,
}

impl MemoryPaymentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1 << 16))),
            available: Notify::new(),
            capacity,
        }
    }

    fn pop(&self) -> Option<PaymentRecord> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl PaymentQueue for MemoryPaymentQueue {
    async fn enqueue(&self, record: PaymentRecord) -> Result<(), StoreError> {
        {
            let mut items = self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if items.len() >= self.capacity {
                return Err(StoreError::QueueFull);
            }
            items.push_back(record);
        }
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<PaymentRecord>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so an enqueue between the
            // check and the await is not lost.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.pop() {
                return Ok(Some(record));
            }

            if time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.pop());
            }
        }
    }

    async fn requeue(&self, record: PaymentRecord) -> Result<(), StoreError> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(record);
        self.available.notify_one();
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len())
    }

    async fn purge(&self) -> Result<(), StoreError> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn record(id: &str) -> PaymentRecord {
        PaymentRecord::new(id, dec!(10.00)).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_rejects_when_full_without_blocking() {
        let queue = MemoryPaymentQueue::new(2);
        queue.enqueue(record("a")).await.unwrap();
        queue.enqueue(record("b")).await.unwrap();

        let result = time::timeout(Duration::from_millis(50), queue.enqueue(record("c"))).await;
        assert!(matches!(result, Ok(Err(StoreError::QueueFull))));
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_requeue_may_exceed_capacity() {
        let queue = MemoryPaymentQueue::new(1);
        queue.enqueue(record("a")).await.unwrap();
        queue.requeue(record("b")).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dequeue_in_arrival_order() {
        let queue = MemoryPaymentQueue::new(10);
        queue.enqueue(record("a")).await.unwrap();
        queue.enqueue(record("b")).await.unwrap();

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.correlation_id(), "a");
        assert_eq!(second.correlation_id(), "b");
    }

    #[tokio::test]
    async fn test_dequeue_times_out_on_empty_queue() {
        let queue = MemoryPaymentQueue::new(10);
        let started = Instant::now();
        let result = queue.dequeue(Duration::from_millis(30)).await.unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_waiting_consumer_is_woken_by_enqueue() {
        let queue = Arc::new(MemoryPaymentQueue::new(10));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(record("late")).await.unwrap();

        let received = time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake up")
            .unwrap()
            .unwrap();
        assert_eq!(received.unwrap().correlation_id(), "late");
    }

    #[tokio::test]
    async fn test_purge_empties_queue() {
        let queue = MemoryPaymentQueue::new(10);
        queue.enqueue(record("a")).await.unwrap();
        queue.requeue(record("b")).await.unwrap();
        queue.purge().await.unwrap();
        queue.purge().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
        assert!(queue.dequeue(Duration::from_millis(5)).await.unwrap().is_none());
    }
}
