use super::{CounterStore, Increment};
use crate::error::{LimiterError, Result};
use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, Script};
use std::time::Duration;
use tracing::{debug, error};

/// Lua script for an atomic increment with expiry
///
/// The expiry is set when the counter is created and repaired if the key
/// somehow lost it, all inside the same script as the `INCR`, so a counter
/// never exists without a TTL.
///
/// KEYS[1] = the counter key
/// ARGV[1] = TTL (milliseconds)
///
/// Returns: [count, remaining ttl in milliseconds]
pub const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local ttl = tonumber(ARGV[1])

local count = redis.call('INCR', key)
local remaining = redis.call('PTTL', key)

if count == 1 or remaining < 0 then
    redis.call('PEXPIRE', key, ttl)
    remaining = ttl
end

return {count, remaining}
"#;

/// Redis-backed distributed counter store
pub struct RedisStore {
    connection: RedisConnection,
    script: Script,
    ttl: Duration,
    key_prefix: String,
}

/// Single node or cluster connection; both are cheap to clone
#[derive(Clone)]
enum RedisConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl RedisStore {
    /// Connect to Redis, in cluster mode when `cluster_mode` is set.
    ///
    /// `addr` may list several comma-separated seed nodes in cluster mode.
    pub async fn connect(
        addr: &str,
        cluster_mode: bool,
        ttl: Duration,
        key_prefix: String,
    ) -> Result<Self> {
        let connection = if cluster_mode {
            let nodes: Vec<&str> = addr.split(',').map(str::trim).collect();
            let client = ClusterClient::new(nodes).map_err(|e| {
                LimiterError::StoreUnavailable(format!("Failed to create Redis cluster client: {}", e))
            })?;
            RedisConnection::Cluster(client.get_async_connection().await.map_err(|e| {
                LimiterError::StoreUnavailable(format!("Failed to connect to Redis cluster: {}", e))
            })?)
        } else {
            let client = Client::open(addr).map_err(|e| {
                LimiterError::StoreUnavailable(format!("Failed to create Redis client: {}", e))
            })?;
            RedisConnection::Single(ConnectionManager::new(client).await.map_err(|e| {
                LimiterError::StoreUnavailable(format!("Failed to connect to Redis: {}", e))
            })?)
        };

        Ok(Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
            ttl,
            key_prefix,
        })
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }

    async fn invoke<C: ConnectionLike>(&self, conn: &mut C, key: &str) -> Result<(i64, i64)> {
        self.script
            .key(key)
            .arg(self.ttl_millis())
            .invoke_async::<_, (i64, i64)>(conn)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis increment failed");
                LimiterError::from(e)
            })
    }

    async fn query_ping<C: ConnectionLike>(conn: &mut C) -> Result<()> {
        let pong: String = redis::cmd("PING").query_async(conn).await?;
        debug!(reply = %pong, "Redis ping");
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<Increment> {
        let counter_key = self.counter_key(key);

        let (count, remaining_ms) = match self.connection.clone() {
            RedisConnection::Single(mut conn) => self.invoke(&mut conn, &counter_key).await?,
            RedisConnection::Cluster(mut conn) => self.invoke(&mut conn, &counter_key).await?,
        };

        if count <= 0 {
            return Err(LimiterError::StoreUnavailable(format!(
                "unexpected counter value {} for key {}",
                count, counter_key
            )));
        }

        Ok(Increment {
            count: count as u64,
            expires_in: Duration::from_millis(remaining_ms.max(0) as u64),
        })
    }

    async fn ping(&self) -> Result<()> {
        match self.connection.clone() {
            RedisConnection::Single(mut conn) => Self::query_ping(&mut conn).await,
            RedisConnection::Cluster(mut conn) => Self::query_ping(&mut conn).await,
        }
    }

    fn backend(&self) -> &'static str {
        match self.connection {
            RedisConnection::Single(_) => "redis",
            RedisConnection::Cluster(_) => "redis-cluster",
        }
    }
}
