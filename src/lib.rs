pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health_coordinator;
pub mod health_storage;
pub mod http_client;
pub mod metrics;
pub mod payment;
pub mod queue;
pub mod redis_store;
pub mod storage;
pub mod worker;

pub use config::{GatewayConfig, StorageBackend};
pub use error::{DeliveryError, GatewayError, StoreError, ValidationError};
pub use gateway::PaymentGateway;
pub use health_coordinator::{CycleOutcome, HealthCoordinator, HealthState};
pub use health_storage::{HealthStorage, MemoryHealthStorage};
pub use http_client::{HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use metrics::{MemoryMetricsStore, MetricsStore};
pub use payment::{LedgerEntry, PaymentRecord, PaymentSummary, ProcessorChoice, ProcessorSummary};
pub use queue::{MemoryPaymentQueue, PaymentQueue};
pub use redis_store::RedisStore;
pub use storage::Storage;
