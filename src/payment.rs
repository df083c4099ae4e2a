use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// A payment accepted at ingress. Validated on construction and immutable
/// afterwards. The amount is held at cent precision, so what is forwarded
/// upstream is exactly what gets recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PaymentRecordWire", into = "PaymentRecordWire")]
pub struct PaymentRecord {
    correlation_id: String,
    amount: Decimal,
    amount_cents: i64,
}

#[derive(Serialize, Deserialize)]
struct PaymentRecordWire {
    #[serde(rename = "correlationId")]
    correlation_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
}

impl PaymentRecord {
    pub fn new(
        correlation_id: impl Into<String>,
        amount: Decimal,
    ) -> Result<Self, ValidationError> {
        let correlation_id = correlation_id.into();
        if correlation_id.trim().is_empty() {
            return Err(ValidationError::EmptyCorrelationId);
        }
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        let amount_cents =
            to_cents(amount).ok_or(ValidationError::UnrepresentableAmount(amount))?;
        if amount_cents <= 0 {
            return Err(ValidationError::NonPositiveAmount(amount));
        }

        Ok(Self {
            correlation_id,
            amount: from_cents(amount_cents),
            amount_cents,
        })
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Amount in minor units. All stored totals are kept in this form.
    pub fn amount_cents(&self) -> i64 {
        self.amount_cents
    }
}

impl TryFrom<PaymentRecordWire> for PaymentRecord {
    type Error = ValidationError;

    fn try_from(wire: PaymentRecordWire) -> Result<Self, Self::Error> {
        PaymentRecord::new(wire.correlation_id, wire.amount)
    }
}

impl From<PaymentRecord> for PaymentRecordWire {
    fn from(record: PaymentRecord) -> Self {
        Self {
            correlation_id: record.correlation_id,
            amount: record.amount,
        }
    }
}

/// Rounds half away from zero to two fractional digits, then scales to cents.
pub fn to_cents(amount: Decimal) -> Option<i64> {
    amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(Decimal::ONE_HUNDRED)?
        .to_i64()
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessorChoice {
    #[default]
    Default,
    Fallback,
}

impl ProcessorChoice {
    pub const ALL: [ProcessorChoice; 2] = [ProcessorChoice::Default, ProcessorChoice::Fallback];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorChoice::Default => "DEFAULT",
            ProcessorChoice::Fallback => "FALLBACK",
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ProcessorChoice::Default)
    }
}

impl fmt::Display for ProcessorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" => Ok(ProcessorChoice::Default),
            "FALLBACK" => Ok(ProcessorChoice::Fallback),
            other => Err(format!("unknown processor: {other}")),
        }
    }
}

/// One successfully forwarded payment, as held by the metrics store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub correlation_id: String,
    pub amount_cents: i64,
    pub is_default: bool,
    pub committed_at_millis: i64,
}

impl LedgerEntry {
    pub fn new(
        record: &PaymentRecord,
        processor: ProcessorChoice,
        committed_at_millis: i64,
    ) -> Self {
        Self {
            correlation_id: record.correlation_id().to_string(),
            amount_cents: record.amount_cents(),
            is_default: processor.is_default(),
            committed_at_millis,
        }
    }

    pub fn processor(&self) -> ProcessorChoice {
        if self.is_default {
            ProcessorChoice::Default
        } else {
            ProcessorChoice::Fallback
        }
    }
}

/// Integer running totals for one processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorTotals {
    pub count: u64,
    pub total_cents: i64,
}

impl ProcessorTotals {
    pub fn add(&mut self, cents: i64) {
        self.count += 1;
        self.total_cents += cents;
    }

    pub fn remove(&mut self, cents: i64) {
        self.count = self.count.saturating_sub(1);
        self.total_cents -= cents;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessorSummary {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "totalAmount", with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

impl Default for ProcessorSummary {
    fn default() -> Self {
        Self {
            total_requests: 0,
            total_amount: from_cents(0),
        }
    }
}

impl From<ProcessorTotals> for ProcessorSummary {
    fn from(totals: ProcessorTotals) -> Self {
        Self {
            total_requests: totals.count,
            total_amount: from_cents(totals.total_cents),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PaymentSummary {
    pub default: ProcessorSummary,
    pub fallback: ProcessorSummary,
}

impl PaymentSummary {
    pub fn from_totals(default: ProcessorTotals, fallback: ProcessorTotals) -> Self {
        Self {
            default: default.into(),
            fallback: fallback.into(),
        }
    }
}
