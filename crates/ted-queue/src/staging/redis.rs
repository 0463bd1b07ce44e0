//! Redis staging queue.
//!
//! Layout, per queue `{ns}:{queue}`:
//! - sorted set `{ns}:{queue}` scoring message ids by the millisecond they become visible
//! - hash `{ns}:{queue}:Q` holding queue attributes, payloads (`{id}`), receive counts
//!   (`{id}:rc`) and the current lease receipt (`{id}:lease`)
//!
//! Leasing and deleting run as Lua scripts so concurrent drainers can never hold the same entry
//! at once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::{lease_id, split_lease_id, StagedTask, StagingBackend, StagingMetrics};
use crate::{QueueError, Result};

const RECEIVE_SCRIPT: &str = r#"
    local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, 1)
    if #ids == 0 then
        return false
    end
    local id = ids[1]
    redis.call("ZADD", KEYS[1], ARGV[2], id)
    local rc = redis.call("HINCRBY", KEYS[2], id .. ":rc", 1)
    redis.call("HSET", KEYS[2], id .. ":lease", ARGV[3])
    local body = redis.call("HGET", KEYS[2], id)
    return {id, body, rc}
"#;

const DELETE_SCRIPT: &str = r#"
    if redis.call("HGET", KEYS[2], ARGV[1] .. ":lease") ~= ARGV[2] then
        return 0
    end
    redis.call("ZREM", KEYS[1], ARGV[1])
    redis.call("HDEL", KEYS[2], ARGV[1], ARGV[1] .. ":rc", ARGV[1] .. ":lease")
    return 1
"#;

/// Configuration for the Redis staging backend
#[derive(Debug, Clone)]
pub struct RedisStagingConfig {
    pub url: String,
    /// Prefix shared by all staging queue keys
    pub namespace: String,
    pub queue_name: String,
}

impl Default for RedisStagingConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "ted".to_string(),
            queue_name: "projection-tasks".to_string(),
        }
    }
}

pub struct RedisStagingBackend {
    config: RedisStagingConfig,
    conn: ConnectionManager,
    queue_key: String,
    hash_key: String,
    receive_script: redis::Script,
    delete_script: redis::Script,
}

impl RedisStagingBackend {
    pub async fn connect(config: RedisStagingConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| QueueError::Provisioning(format!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Provisioning(format!("Redis connection failed: {}", e)))?;

        let queue_key = format!("{}:{}", config.namespace, config.queue_name);
        let hash_key = format!("{}:Q", queue_key);

        info!(url = %config.url, queue = %queue_key, "Connected to Redis staging queue");

        Ok(Self {
            config,
            conn,
            queue_key,
            hash_key,
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
            delete_script: redis::Script::new(DELETE_SCRIPT),
        })
    }

    fn queues_key(&self) -> String {
        format!("{}:QUEUES", self.config.namespace)
    }
}

#[async_trait]
impl StagingBackend for RedisStagingBackend {
    fn identifier(&self) -> &str {
        &self.config.queue_name
    }

    async fn create_queue(&self) -> Result<()> {
        let mut conn = self.conn.clone();

        let created: i64 = redis::cmd("HSETNX")
            .arg(&self.hash_key)
            .arg("created")
            .arg(Utc::now().timestamp_millis())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Provisioning(e.to_string()))?;

        if created == 0 {
            return Err(QueueError::QueueExists(self.config.queue_name.clone()));
        }

        redis::cmd("SADD")
            .arg(self.queues_key())
            .arg(&self.config.queue_name)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Provisioning(e.to_string()))?;

        Ok(())
    }

    async fn send(&self, payload: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let id = uuid::Uuid::new_v4().to_string();

        redis::pipe()
            .atomic()
            .zadd(&self.queue_key, &id, Utc::now().timestamp_millis())
            .hset(&self.hash_key, &id, payload)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(id)
    }

    async fn receive(&self, lease: Duration) -> Result<Option<StagedTask>> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let receipt = uuid::Uuid::new_v4().to_string();

        let leased: Option<(String, String, i64)> = self
            .receive_script
            .key(&self.queue_key)
            .key(&self.hash_key)
            .arg(now)
            .arg(now + lease.as_millis() as i64)
            .arg(&receipt)
            .invoke_async(&mut conn)
            .await?;

        Ok(leased.map(|(id, payload, receive_count)| {
            debug!(queue = %self.queue_key, message_id = %id, "Leased staged task");
            StagedTask {
                lease_id: lease_id(&id, &receipt),
                message_id: id,
                payload,
                receive_count: receive_count as u32,
            }
        }))
    }

    async fn delete(&self, lease_id: &str) -> Result<bool> {
        let Some((id, receipt)) = split_lease_id(lease_id) else {
            return Ok(false);
        };
        let mut conn = self.conn.clone();

        let deleted: i64 = self
            .delete_script
            .key(&self.queue_key)
            .key(&self.hash_key)
            .arg(id)
            .arg(receipt)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }

    async fn metrics(&self) -> Result<StagingMetrics> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        let (total, visible): (u64, u64) = redis::pipe()
            .zcard(&self.queue_key)
            .zcount(&self.queue_key, "-inf", now)
            .query_async(&mut conn)
            .await?;

        Ok(StagingMetrics {
            visible,
            leased: total.saturating_sub(visible),
        })
    }
}
