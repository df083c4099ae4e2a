use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::payment::{LedgerEntry, PaymentSummary, ProcessorChoice, ProcessorTotals};

/// Per-processor running totals plus a time-indexed ledger of completed
/// payments.
///
/// `summary()` answers from the running totals in constant time while
/// `summary_in_range` rescans the ledger. Both must agree for the unbounded
/// range.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Last write wins on a duplicate correlation id.
    async fn record(&self, entry: LedgerEntry) -> Result<(), StoreError>;

    async fn summary(&self) -> Result<PaymentSummary, StoreError>;

    /// Bounds are inclusive, in epoch milliseconds.
    async fn summary_in_range(
        &self,
        from_millis: i64,
        to_millis: i64,
    ) -> Result<PaymentSummary, StoreError>;

    async fn purge(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Ledger {
    default_totals: ProcessorTotals,
    fallback_totals: ProcessorTotals,
    entries: HashMap<String, LedgerEntry>,
    by_time: BTreeSet<(i64, String)>,
}

impl Ledger {
    fn totals_mut(&mut self, processor: ProcessorChoice) -> &mut ProcessorTotals {
        match processor {
            ProcessorChoice::Default => &mut self.default_totals,
            ProcessorChoice::Fallback => &mut self.fallback_totals,
        }
    }

    fn insert(&mut self, entry: LedgerEntry) {
        if let Some(previous) = self.entries.remove(&entry.correlation_id) {
            self.by_time
                .remove(&(previous.committed_at_millis, previous.correlation_id.clone()));
            self.totals_mut(previous.processor()).remove(previous.amount_cents);
        }

        self.totals_mut(entry.processor()).add(entry.amount_cents);
        self.by_time
            .insert((entry.committed_at_millis, entry.correlation_id.clone()));
        self.entries.insert(entry.correlation_id.clone(), entry);
    }

    fn scan(&self, from_millis: i64, to_millis: i64) -> PaymentSummary {
        let mut default = ProcessorTotals::default();
        let mut fallback = ProcessorTotals::default();
        if from_millis > to_millis {
            return PaymentSummary::from_totals(default, fallback);
        }

        let lower = (from_millis, String::new());
        for (_, correlation_id) in self.by_time.range(lower..) {
            let Some(entry) = self.entries.get(correlation_id) else {
                continue;
            };
            if entry.committed_at_millis > to_millis {
                break;
            }
            if entry.is_default {
                default.add(entry.amount_cents);
            } else {
                fallback.add(entry.amount_cents);
            }
        }

        PaymentSummary::from_totals(default, fallback)
    }
}

/// Process-local metrics store. A single mutex is the commit point, so the
/// running totals and the ledger never diverge.
#[derive(Default)]
pub struct MemoryMetricsStore {
    ledger: Mutex<Ledger>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut Ledger) -> T) -> T {
        let mut ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut ledger)
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn record(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        self.with_ledger(|ledger| ledger.insert(entry));
        Ok(())
    }

    async fn summary(&self) -> Result<PaymentSummary, StoreError> {
        Ok(self.with_ledger(|ledger| {
            PaymentSummary::from_totals(ledger.default_totals, ledger.fallback_totals)
        }))
    }

    async fn summary_in_range(
        &self,
        from_millis: i64,
        to_millis: i64,
    ) -> Result<PaymentSummary, StoreError> {
        Ok(self.with_ledger(|ledger| ledger.scan(from_millis, to_millis)))
    }

    async fn purge(&self) -> Result<(), StoreError> {
        self.with_ledger(|ledger| *ledger = Ledger::default());
        Ok(())
    }
}
