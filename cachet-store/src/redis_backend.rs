//! Redis-backed cache store.
//!
//! Scalar, hash, and set primitives map directly onto Redis commands
//! through a deadpool connection pool. Atomic batches are compiled into a
//! single Lua script and executed server-side via `redis::Script`, which
//! gives the indivisibility the coherence protocol requires: Redis runs
//! one script at a time, and a script error aborts the whole batch.

use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{CacheError, CachetError, CachetResult};
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use crate::atomic::{AtomicOp, AtomicWrite};
use crate::traits::CacheStore;

/// Error type for Redis store operations.
#[derive(Debug, thiserror::Error)]
pub enum RedisStoreError {
    /// Failed to create or check out from the connection pool.
    #[error("Redis pool error: {0}")]
    Pool(String),

    /// A command or script invocation failed.
    #[error("Redis command error: {0}")]
    Command(String),
}

impl From<RedisStoreError> for CachetError {
    fn from(e: RedisStoreError) -> Self {
        CachetError::Cache(CacheError::Backend {
            reason: e.to_string(),
        })
    }
}

/// Millisecond TTL for PX arguments. Redis rejects a zero expire, so
/// sub-millisecond durations round up to 1.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis().max(1)) as u64
}

/// A compiled atomic batch: Lua body plus its KEYS and ARGV tables.
#[derive(Debug, PartialEq, Eq)]
struct CompiledScript {
    body: String,
    keys: Vec<String>,
    args: Vec<String>,
}

/// Compile an atomic batch into one Lua script.
///
/// Statically known keys go through the KEYS table. The one dynamic key -
/// the result key a member was previously associated with - is read from
/// the reverse hash inside the script body, which confines the protocol to
/// single-node Redis (the contract this store implements).
fn compile(write: &AtomicWrite) -> CompiledScript {
    let mut body = String::new();
    let mut keys: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    // Lua tables are 1-based.
    fn key_at(keys: &mut Vec<String>, key: &str) -> usize {
        keys.push(key.to_string());
        keys.len()
    }
    fn arg_at(args: &mut Vec<String>, value: String) -> usize {
        args.push(value);
        args.len()
    }

    for op in write.ops() {
        match op {
            AtomicOp::Set { key, value, ttl } => {
                let k = key_at(&mut keys, key);
                let v = arg_at(&mut args, value.clone());
                match ttl {
                    Some(t) => {
                        let px = arg_at(&mut args, ttl_millis(*t).to_string());
                        body.push_str(&format!(
                            "redis.call('SET', KEYS[{k}], ARGV[{v}], 'PX', ARGV[{px}])\n"
                        ));
                    }
                    None => {
                        body.push_str(&format!("redis.call('SET', KEYS[{k}], ARGV[{v}])\n"));
                    }
                }
            }
            AtomicOp::SetIfAbsent { key, value, ttl } => {
                let k = key_at(&mut keys, key);
                let v = arg_at(&mut args, value.clone());
                match ttl {
                    Some(t) => {
                        let px = arg_at(&mut args, ttl_millis(*t).to_string());
                        body.push_str(&format!(
                            "redis.call('SET', KEYS[{k}], ARGV[{v}], 'NX', 'PX', ARGV[{px}])\n"
                        ));
                    }
                    None => {
                        body.push_str(&format!(
                            "redis.call('SET', KEYS[{k}], ARGV[{v}], 'NX')\n"
                        ));
                    }
                }
            }
            AtomicOp::Delete { key } => {
                let k = key_at(&mut keys, key);
                body.push_str(&format!("redis.call('DEL', KEYS[{k}])\n"));
            }
            AtomicOp::Expire { key, ttl } => {
                let k = key_at(&mut keys, key);
                let px = arg_at(&mut args, ttl_millis(*ttl).to_string());
                body.push_str(&format!("redis.call('PEXPIRE', KEYS[{k}], ARGV[{px}])\n"));
            }
            AtomicOp::HashSet { key, field, value } => {
                let k = key_at(&mut keys, key);
                let f = arg_at(&mut args, field.clone());
                let v = arg_at(&mut args, value.clone());
                body.push_str(&format!(
                    "redis.call('HSET', KEYS[{k}], ARGV[{f}], ARGV[{v}])\n"
                ));
            }
            AtomicOp::HashDelete { key, field } => {
                let k = key_at(&mut keys, key);
                let f = arg_at(&mut args, field.clone());
                body.push_str(&format!("redis.call('HDEL', KEYS[{k}], ARGV[{f}])\n"));
            }
            AtomicOp::SetAdd { key, member } => {
                let k = key_at(&mut keys, key);
                let m = arg_at(&mut args, member.clone());
                body.push_str(&format!("redis.call('SADD', KEYS[{k}], ARGV[{m}])\n"));
            }
            AtomicOp::SetRemove { key, member } => {
                let k = key_at(&mut keys, key);
                let m = arg_at(&mut args, member.clone());
                body.push_str(&format!("redis.call('SREM', KEYS[{k}], ARGV[{m}])\n"));
            }
            AtomicOp::QueryEvict {
                reverse_key,
                member,
                multiple,
                placeholder,
            } => {
                let k = key_at(&mut keys, reverse_key);
                let m = arg_at(&mut args, member.clone());
                let p = arg_at(&mut args, placeholder.clone());
                body.push_str(&format!(
                    "do\n  local prior = redis.call('HGET', KEYS[{k}], ARGV[{m}])\n  if prior then\n"
                ));
                if *multiple {
                    body.push_str(&format!(
                        "    redis.call('SREM', prior, ARGV[{m}])\n    if redis.call('SCARD', prior) == 0 then\n      redis.call('SADD', prior, ARGV[{p}])\n    end\n"
                    ));
                } else {
                    body.push_str(&format!("    redis.call('SET', prior, ARGV[{p}])\n"));
                }
                body.push_str(&format!(
                    "    redis.call('HDEL', KEYS[{k}], ARGV[{m}])\n  end\nend\n"
                ));
            }
            AtomicOp::QueryAssign {
                reverse_key,
                member,
                result_key,
                multiple,
                placeholder,
            } => {
                let r = key_at(&mut keys, result_key);
                let k = key_at(&mut keys, reverse_key);
                let m = arg_at(&mut args, member.clone());
                if *multiple {
                    let p = arg_at(&mut args, placeholder.clone());
                    body.push_str(&format!(
                        "if redis.call('EXISTS', KEYS[{r}]) == 1 then\n  redis.call('SREM', KEYS[{r}], ARGV[{p}])\n  redis.call('SADD', KEYS[{r}], ARGV[{m}])\n  redis.call('HSET', KEYS[{k}], ARGV[{m}], KEYS[{r}])\nend\n"
                    ));
                } else {
                    body.push_str(&format!(
                        "redis.call('SET', KEYS[{r}], ARGV[{m}])\nredis.call('HSET', KEYS[{k}], ARGV[{m}], KEYS[{r}])\n"
                    ));
                }
            }
        }
    }

    body.push_str("return 1\n");
    CompiledScript { body, keys, args }
}

/// Redis-backed [`CacheStore`].
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a store from a Redis URL.
    pub fn from_url(url: &str) -> Result<Self, RedisStoreError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RedisStoreError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, RedisStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| RedisStoreError::Pool(e.to_string()))
    }
}

fn cmd_err(e: redis::RedisError) -> CachetError {
    RedisStoreError::Command(e.to_string()).into()
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CachetResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await.map_err(cmd_err)?;
        Ok(value)
    }

    async fn m_get(&self, keys: &[String]) -> CachetResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut *conn)
            .await
            .map_err(cmd_err)?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CachetResult<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(t) => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_millis(t))
                    .query_async(&mut *conn)
                    .await
                    .map_err(cmd_err)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(cmd_err)?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CachetResult<bool> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(t) = ttl {
            cmd.arg("PX").arg(ttl_millis(t));
        }
        // SET NX replies OK on write, nil when the key already exists.
        let outcome: Option<String> = cmd.query_async(&mut *conn).await.map_err(cmd_err)?;
        Ok(outcome.is_some())
    }

    async fn delete(&self, key: &str) -> CachetResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await.map_err(cmd_err)?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> CachetResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.hget(key, field).await.map_err(cmd_err)?;
        Ok(value)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> CachetResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(key, field, value).await.map_err(cmd_err)?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> CachetResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hdel(key, field).await.map_err(cmd_err)?;
        Ok(())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> CachetResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(key, members).await.map_err(cmd_err)?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> CachetResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.srem(key, members).await.map_err(cmd_err)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> CachetResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await.map_err(cmd_err)?;
        Ok(members)
    }

    async fn set_len(&self, key: &str) -> CachetResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.scard(key).await.map_err(cmd_err)?;
        Ok(len)
    }

    async fn run_atomic(&self, write: AtomicWrite) -> CachetResult<()> {
        if write.is_empty() {
            return Ok(());
        }
        let compiled = compile(&write);
        let script = redis::Script::new(&compiled.body);
        let mut invocation = script.prepare_invoke();
        for key in &compiled.keys {
            invocation.key(key.as_str());
        }
        for arg in &compiled.args {
            invocation.arg(arg.as_str());
        }
        let mut conn = self.conn().await?;
        invocation
            .invoke_async::<()>(&mut *conn)
            .await
            .map_err(|e| {
                CachetError::Cache(CacheError::AtomicFailed {
                    reason: e.to_string(),
                })
            })?;
        Ok(())
    }
}
