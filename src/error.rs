use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("correlationId must not be empty")]
    EmptyCorrelationId,
    #[error("amount must be greater than zero, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("amount {0} cannot be represented in minor units")]
    UnrepresentableAmount(Decimal),
}

/// Failures of a backing store operation (queue, metrics or health state).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("admission queue is full")]
    QueueFull,
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Outcomes that cross the gateway boundary to the caller.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("payment rejected: admission queue is full")]
    AdmissionRejected,
    #[error("invalid payment: {0}")]
    ValidationFailed(#[from] ValidationError),
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(StoreError),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QueueFull => GatewayError::AdmissionRejected,
            other => GatewayError::StoreUnavailable(other),
        }
    }
}

/// Why a single delivery attempt to an upstream processor failed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("processor returned status {0}")]
    Status(u16),
    #[error("processor did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not encode request: {0}")]
    Encode(#[from] serde_json::Error),
}
