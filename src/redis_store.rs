use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::health_storage::HealthStorage;
use crate::metrics::MetricsStore;
use crate::payment::{LedgerEntry, PaymentRecord, PaymentSummary, ProcessorChoice, ProcessorTotals};
use crate::queue::PaymentQueue;

const PAYMENT_QUEUE_KEY: &str = "payment_queue";
const SUMMARY_KEY: &str = "payment_summary";
const PAYMENTS_BY_TIME_KEY: &str = "payments_by_time";
const PAYMENTS_BY_ID_KEY: &str = "payments_by_id";
const HEALTH_LOCK_KEY: &str = "health_check_lock";
const HEALTHY_PROCESSOR_KEY: &str = "healthy_processor";

const ENQUEUE_SCRIPT: &str = r"
if redis.call('LLEN', KEYS[1]) >= tonumber(ARGV[2]) then
    return 0
end
redis.call('LPUSH', KEYS[1], ARGV[1])
return 1
";

// KEYS: by_time, by_id, summary
// ARGV: correlation id, member, cents, processor prefix, committed millis
const RECORD_SCRIPT: &str = r"
local previous = redis.call('HGET', KEYS[2], ARGV[1])
if previous then
    redis.call('ZREM', KEYS[1], previous)
    local cents, is_default = string.match(previous, ':(%-?%d+):(%a+)$')
    local prefix = 'fallback'
    if is_default == 'true' then
        prefix = 'default'
    end
    redis.call('HINCRBY', KEYS[3], prefix .. '_count', -1)
    redis.call('HINCRBY', KEYS[3], prefix .. '_total_cents', -tonumber(cents))
end
redis.call('ZADD', KEYS[1], ARGV[5], ARGV[2])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('HINCRBY', KEYS[3], ARGV[4] .. '_count', 1)
redis.call('HINCRBY', KEYS[3], ARGV[4] .. '_total_cents', ARGV[3])
return 1
";

const RANGE_SUMMARY_SCRIPT: &str = r"
local payments = redis.call('ZRANGEBYSCORE', KEYS[1], ARGV[1], ARGV[2])
local default_count = 0
local default_cents = 0
local fallback_count = 0
local fallback_cents = 0
for _, member in ipairs(payments) do
    local cents, is_default = string.match(member, ':(%-?%d+):(%a+)$')
    if is_default == 'true' then
        default_count = default_count + 1
        default_cents = default_cents + tonumber(cents)
    else
        fallback_count = fallback_count + 1
        fallback_cents = fallback_cents + tonumber(cents)
    end
end
return {default_count, default_cents, fallback_count, fallback_cents}
";

const RELEASE_LOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Ledger member layout: `correlationId:amountCents:isDefault`.
pub fn encode_member(entry: &LedgerEntry) -> String {
    format!(
        "{}:{}:{}",
        entry.correlation_id, entry.amount_cents, entry.is_default
    )
}

fn score_bound(millis: i64) -> String {
    match millis {
        i64::MIN => "-inf".to_string(),
        i64::MAX => "+inf".to_string(),
        value => value.to_string(),
    }
}

fn totals_from_hash(fields: &HashMap<String, i64>, prefix: &str) -> ProcessorTotals {
    let count = fields.get(&format!("{prefix}_count")).copied().unwrap_or(0);
    let total_cents = fields
        .get(&format!("{prefix}_total_cents"))
        .copied()
        .unwrap_or(0);
    ProcessorTotals {
        count: count.max(0) as u64,
        total_cents,
    }
}

/// Shared-store backend: one Redis (or Valkey) database serving as admission
/// queue, metrics store and health state for every gateway instance.
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    // BRPOP holds its connection for the whole wait, so it gets its own.
    blocking: Mutex<Vec<MultiplexedConnection>>,
    capacity: usize,
    enqueue_script: Script,
    record_script: Script,
    range_summary_script: Script,
    release_lock_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, capacity: usize) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(redis_url, "Connected to redis");

        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
            capacity,
            enqueue_script: Script::new(ENQUEUE_SCRIPT),
            record_script: Script::new(RECORD_SCRIPT),
            range_summary_script: Script::new(RANGE_SUMMARY_SCRIPT),
            release_lock_script: Script::new(RELEASE_LOCK_SCRIPT),
        })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }
}

#[async_trait]
impl PaymentQueue for RedisStore {
    async fn enqueue(&self, record: PaymentRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.connection();
        let accepted: i64 = self
            .enqueue_script
            .key(PAYMENT_QUEUE_KEY)
            .arg(payload)
            .arg(self.capacity)
            .invoke_async(&mut conn)
            .await?;

        if accepted == 1 {
            Ok(())
        } else {
            Err(StoreError::QueueFull)
        }
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<PaymentRecord>, StoreError> {
        let mut conn = self.checkout_blocking().await?;
        // BRPOP treats 0 as "forever"
        let seconds = wait.as_secs_f64().max(0.01);
        let popped: Option<(String, String)> = conn.brpop(PAYMENT_QUEUE_KEY, seconds).await?;
        self.checkin_blocking(conn).await;

        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn requeue(&self, record: PaymentRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.connection();
        let _: i64 = conn.lpush(PAYMENT_QUEUE_KEY, payload).await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut conn = self.connection();
        let len: usize = conn.llen(PAYMENT_QUEUE_KEY).await?;
        Ok(len)
    }

    async fn purge(&self) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: i64 = conn.del(PAYMENT_QUEUE_KEY).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricsStore for RedisStore {
    async fn record(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        let prefix = if entry.is_default { "default" } else { "fallback" };
        let mut conn = self.connection();
        let _: i64 = self
            .record_script
            .key(PAYMENTS_BY_TIME_KEY)
            .key(PAYMENTS_BY_ID_KEY)
            .key(SUMMARY_KEY)
            .arg(&entry.correlation_id)
            .arg(encode_member(&entry))
            .arg(entry.amount_cents)
            .arg(prefix)
            .arg(entry.committed_at_millis)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn summary(&self) -> Result<PaymentSummary, StoreError> {
        let mut conn = self.connection();
        let fields: HashMap<String, i64> = conn.hgetall(SUMMARY_KEY).await?;
        Ok(PaymentSummary::from_totals(
            totals_from_hash(&fields, "default"),
            totals_from_hash(&fields, "fallback"),
        ))
    }

    async fn summary_in_range(
        &self,
        from_millis: i64,
        to_millis: i64,
    ) -> Result<PaymentSummary, StoreError> {
        if from_millis > to_millis {
            return Ok(PaymentSummary::default());
        }

        let mut conn = self.connection();
        let result: Vec<i64> = self
            .range_summary_script
            .key(PAYMENTS_BY_TIME_KEY)
            .arg(score_bound(from_millis))
            .arg(score_bound(to_millis))
            .invoke_async(&mut conn)
            .await?;

        let &[default_count, default_cents, fallback_count, fallback_cents] = result.as_slice()
        else {
            return Err(StoreError::Corrupt(format!(
                "range summary returned {} values",
                result.len()
            )));
        };

        Ok(PaymentSummary::from_totals(
            ProcessorTotals {
                count: default_count.max(0) as u64,
                total_cents: default_cents,
            },
            ProcessorTotals {
                count: fallback_count.max(0) as u64,
                total_cents: fallback_cents,
            },
        ))
    }

    async fn purge(&self) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: i64 = conn
            .del(&[SUMMARY_KEY, PAYMENTS_BY_TIME_KEY, PAYMENTS_BY_ID_KEY][..])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HealthStorage for RedisStore {
    async fn try_acquire_lock(&self, owner: &str, lease: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let lease_millis = lease.as_millis().max(1) as u64;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(HEALTH_LOCK_KEY)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(lease_millis)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, owner: &str) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: i64 = self
            .release_lock_script
            .key(HEALTH_LOCK_KEY)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn publish_processor(&self, processor: ProcessorChoice) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: () = conn.set(HEALTHY_PROCESSOR_KEY, processor.as_str()).await?;
        Ok(())
    }

    async fn published_processor(&self) -> Result<Option<ProcessorChoice>, StoreError> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(HEALTHY_PROCESSOR_KEY).await?;
        value
            .map(|raw| raw.parse::<ProcessorChoice>().map_err(StoreError::Corrupt))
            .transpose()
    }

    async fn purge(&self) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: i64 = conn.del(HEALTHY_PROCESSOR_KEY).await?;
        Ok(())
    }
}
