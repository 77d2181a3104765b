use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub tokens_remaining: f64,
}

/// A single-request token-bucket check, keyed per `(tenant, channel)` bucket.
/// `max_tokens` is the bucket capacity and `refill_per_second` the steady
/// refill rate; both come from the channel's configured throughput.
#[async_trait]
pub trait TokenBucketLimiter: Send + Sync {
    async fn check(
        &self,
        key: &str,
        max_tokens: f64,
        refill_per_second: f64,
        requested: f64,
    ) -> Result<RateDecision>;
}

/// Lua script executed atomically inside Redis so the read-refill-subtract
/// sequence can't race across concurrent callers: load the bucket state,
/// refill it for elapsed time, and either accept (subtracting tokens) or
/// reject (persisting the refill without the debit) in one round trip.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local max_tokens = tonumber(ARGV[1])
local refill_per_second = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local tokens = max_tokens
local last_refill = now

local state = redis.call("HMGET", key, "tokens", "last_refill")
if state[1] and state[2] then
    tokens = tonumber(state[1])
    last_refill = tonumber(state[2])
end

local elapsed = now - last_refill
if elapsed < 0 then
    elapsed = 0
end
tokens = math.min(max_tokens, tokens + elapsed * refill_per_second)

local remaining = tokens - requested
local allowed = 0
if remaining >= 0 then
    allowed = 1
    tokens = remaining
end

redis.call("HSET", key, "tokens", tokens, "last_refill", now)
redis.call("EXPIRE", key, ttl)

return { allowed, tostring(tokens) }
"#;

#[derive(Clone)]
pub struct RedisTokenBucket {
    manager: ConnectionManager,
    script: Arc<Script>,
    prefix: String,
}

impl RedisTokenBucket {
    pub async fn new(redis_url: &str, prefix: String) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("failed to create redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to create redis connection manager")?;
        Ok(Self {
            manager,
            script: Arc::new(Script::new(TOKEN_BUCKET_SCRIPT)),
            prefix,
        })
    }
}

#[async_trait]
impl TokenBucketLimiter for RedisTokenBucket {
    async fn check(
        &self,
        key: &str,
        max_tokens: f64,
        refill_per_second: f64,
        requested: f64,
    ) -> Result<RateDecision> {
        let redis_key = format!("{}:{}", self.prefix, key);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        // TTL covers at least two refill periods so an idle bucket expires
        // instead of pinning memory forever, while never expiring mid-burst.
        let ttl = ((max_tokens / refill_per_second.max(0.001)) * 2.0).ceil().max(2.0) as i64;

        let mut conn = self.manager.clone();
        let (allowed, tokens_remaining): (i64, String) = self
            .script
            .key(redis_key)
            .arg(max_tokens)
            .arg(refill_per_second)
            .arg(now)
            .arg(requested)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await
            .context("token bucket script failed")?;

        Ok(RateDecision {
            allowed: allowed == 1,
            tokens_remaining: tokens_remaining.parse().unwrap_or(0.0),
        })
    }
}

/// In-process bucket used by tests and local development without Redis.
#[derive(Clone)]
pub struct InMemoryTokenBucket {
    inner: Arc<Mutex<HashMap<String, (f64, f64)>>>,
}

impl InMemoryTokenBucket {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTokenBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenBucketLimiter for InMemoryTokenBucket {
    async fn check(
        &self,
        key: &str,
        max_tokens: f64,
        refill_per_second: f64,
        requested: f64,
    ) -> Result<RateDecision> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let mut guard = self.inner.lock().await;
        let (tokens, last_refill) = guard.entry(key.to_string()).or_insert((max_tokens, now));

        let elapsed = (now - *last_refill).max(0.0);
        *tokens = (*tokens + elapsed * refill_per_second).min(max_tokens);
        *last_refill = now;

        let remaining = *tokens - requested;
        let allowed = remaining >= 0.0;
        if allowed {
            *tokens = remaining;
        }

        Ok(RateDecision {
            allowed,
            tokens_remaining: *tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_up_to_capacity_then_rejects() {
        let limiter = InMemoryTokenBucket::new();
        for _ in 0..5 {
            let decision = limiter.check("tenant:channel", 5.0, 1.0, 1.0).await.unwrap();
            assert!(decision.allowed);
        }
        let decision = limiter.check("tenant:channel", 5.0, 1.0, 1.0).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn buckets_are_isolated_per_key() {
        let limiter = InMemoryTokenBucket::new();
        for _ in 0..5 {
            limiter.check("tenant-a:channel", 5.0, 1.0, 1.0).await.unwrap();
        }
        let decision = limiter.check("tenant-b:channel", 5.0, 1.0, 1.0).await.unwrap();
        assert!(decision.allowed);
    }
}
