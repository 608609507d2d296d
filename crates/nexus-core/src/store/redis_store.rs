//! Redis-backed store.
//!
//! Uses `redis::aio::ConnectionManager` for a multiplexed connection with
//! automatic reconnection. Pattern deletion walks the keyspace with `SCAN` so
//! the server is never blocked by `KEYS`.

use std::time::Duration;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{RedisError, Script};
use tracing::debug;

use super::{redact_url, KeyValueStore, StoreFuture, WindowOutcome, WindowRequest};
use crate::clock::duration_to_millis;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Prune, count and conditionally record in one server-side step.
///
/// KEYS[1] window key; ARGV: now_ms, window_start_ms, max_requests, window_ms, member.
/// Returns {admitted, count, oldest_ms or -1}.
const ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[2])
local count = redis.call('ZCARD', KEYS[1])
local admitted = 0
if count < tonumber(ARGV[3]) then
  redis.call('ZADD', KEYS[1], ARGV[1], ARGV[5])
  redis.call('PEXPIRE', KEYS[1], ARGV[4])
  count = count + 1
  admitted = 1
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
"#;

#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    admit_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    /// Opens a managed connection, bounded by `config.connect_timeout`.
    ///
    /// Every later command waits at most `config.response_timeout` for its
    /// reply, so a server that accepts connections but stops answering fails
    /// fast instead of stalling callers.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            StoreError::Unavailable(format!("invalid redis url: {e}"))
        })?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connect_timeout)
            .set_response_timeout(config.response_timeout);

        let connection_manager = tokio::time::timeout(
            config.connect_timeout,
            ConnectionManager::new_with_config(client, manager_config),
        )
        .await
        .map_err(|_| {
            StoreError::Unavailable(format!(
                "redis connect timed out after {}s",
                config.connect_timeout.as_secs()
            ))
        })?
        .map_err(unavailable)?;

        debug!(url = %redact_url(&config.url), "redis store connected");

        Ok(Self {
            connection_manager,
            admit_script: Script::new(ADMIT_SCRIPT),
        })
    }
}

fn unavailable(error: RedisError) -> StoreError {
    if error.is_io_error() || error.is_connection_dropped() || error.is_timeout() {
        StoreError::Unavailable(error.to_string())
    } else {
        StoreError::Backend(error.to_string())
    }
}

impl KeyValueStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let mut conn = self.connection_manager.clone();
            let value: Option<Vec<u8>> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            Ok(value)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.connection_manager.clone();
            match ttl.filter(|ttl| !ttl.is_zero()) {
                Some(ttl) => {
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("PX")
                        .arg(duration_to_millis(ttl).max(1))
                        .query_async::<()>(&mut conn)
                        .await
                }
                None => {
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .query_async::<()>(&mut conn)
                        .await
                }
            }
            .map_err(unavailable)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.connection_manager.clone();
            let removed: u64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            Ok(removed > 0)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.connection_manager.clone();
            let found: u64 = redis::cmd("EXISTS")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            Ok(found > 0)
        })
    }

    fn delete_pattern<'a>(&'a self, pattern: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut conn = self.connection_manager.clone();
            let mut deleted: u64 = 0;
            let mut cursor: u64 = 0;

            loop {
                let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await
                    .map_err(unavailable)?;

                if !keys.is_empty() {
                    let count: u64 = redis::cmd("DEL")
                        .arg(&keys)
                        .query_async(&mut conn)
                        .await
                        .map_err(unavailable)?;
                    deleted += count;
                }

                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }

            debug!(pattern, deleted, "redis pattern delete");
            Ok(deleted)
        })
    }

    fn admit_in_window<'a>(
        &'a self,
        key: &'a str,
        request: WindowRequest,
    ) -> StoreFuture<'a, WindowOutcome> {
        Box::pin(async move {
            let mut conn = self.connection_manager.clone();
            // Unique member so two admissions in the same millisecond both count.
            let member = format!("{}-{:016x}", request.now_millis, fastrand::u64(..));

            let (admitted, count, oldest): (i64, i64, i64) = self
                .admit_script
                .key(key)
                .arg(request.now_millis)
                .arg(request.window_start_millis())
                .arg(request.max_requests)
                .arg(duration_to_millis(request.window).max(1))
                .arg(member)
                .invoke_async(&mut conn)
                .await
                .map_err(unavailable)?;

            Ok(WindowOutcome {
                admitted: admitted == 1,
                count: u32::try_from(count).unwrap_or(0),
                oldest_millis: (oldest >= 0).then_some(oldest),
            })
        })
    }

    fn health_check<'a>(&'a self) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.connection_manager.clone();
            let pong: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            Ok(pong == "PONG")
        })
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}
