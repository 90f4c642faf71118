//! Redis backend for horizontally scaled deployments
//!
//! Follows the connection handling used across the service fleet: a
//! [`ConnectionManager`] cloned per operation (clones share the underlying
//! multiplexed connection), raw commands for anything past simple KV, and a
//! bounded timeout on every call so a slow Redis can never stall the request
//! path. Timeouts and transport errors surface as [`StoreError`] for the
//! caller's fail-open/fail-closed policy.

use crate::{GuardStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self { conn, op_timeout }
    }

    pub async fn connect(redis_url: &str, op_timeout: Duration) -> StoreResult<Self> {
        let client =
            Client::open(redis_url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tracing::info!("connected guard store to redis");
        Ok(Self::new(conn, op_timeout))
    }

    async fn run<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

#[async_trait]
impl GuardStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        self.run(cmd.query_async::<_, ()>(&mut conn)).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.run(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .run(redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        self.run(redis::cmd("EXISTS").arg(key).query_async(&mut conn))
            .await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .run(redis::cmd("INCR").arg(key).query_async(&mut conn))
            .await?;

        // TTL is attached when the counter is created.
        if count == 1 {
            let mut conn = self.conn.clone();
            self.run(
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl.as_millis() as u64)
                    .query_async::<_, i64>(&mut conn),
            )
            .await?;
        }
        Ok(count)
    }

    async fn window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        member: &str,
    ) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let cutoff = now_ms - window_ms;

        // MULTI/EXEC keeps prune-insert-count atomic per key; a concurrent
        // request on the same key sees either none or all of it.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .ignore();

        let (count,): (u64,) = self.run(pipe.query_async(&mut conn)).await?;
        Ok(count)
    }

    async fn window_discard(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        self.run(
            redis::cmd("ZREM")
                .arg(key)
                .arg(member)
                .query_async::<_, u64>(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn index_add(&self, key: &str, score_ms: i64, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        self.run(
            redis::cmd("ZADD")
                .arg(key)
                .arg(score_ms)
                .arg(member)
                .query_async::<_, u64>(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn index_range(&self, key: &str, min_ms: i64, max_ms: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        self.run(
            redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(min_ms)
                .arg(max_ms)
                .query_async(&mut conn),
        )
        .await
    }

    async fn index_remove_below(&self, key: &str, cutoff_ms: i64) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        self.run(
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(format!("({cutoff_ms}"))
                .query_async(&mut conn),
        )
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        self.run(
            redis::cmd("KEYS")
                .arg(format!("{prefix}*"))
                .query_async(&mut conn),
        )
        .await
    }
}
