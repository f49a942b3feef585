use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-office monotonic counter used to alternate ties between
/// equally-loaded managers. `next` is atomic read-and-increment.
#[async_trait]
pub trait RotationCounter: Send + Sync {
    async fn next(&self, office: &str) -> Result<u64, anyhow::Error>;
}

pub struct RedisRotation {
    client: redis::Client,
}

impl RedisRotation {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RotationCounter for RedisRotation {
    async fn next(&self, office: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: u64 = conn.incr(format!("rr:office:{office}"), 1).await?;
        Ok(value)
    }
}

/// In-process counter for tests and single-node setups without Redis.
#[derive(Default)]
pub struct MemoryRotation {
    counters: Mutex<HashMap<String, u64>>,
}

impl MemoryRotation {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RotationCounter for MemoryRotation {
    async fn next(&self, office: &str) -> Result<u64, anyhow::Error> {
        let mut counters = self.counters.lock().expect("rotation lock poisoned");
        let entry = counters.entry(office.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}
