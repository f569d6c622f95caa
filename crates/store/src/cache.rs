//! Two-tier read-through cache
//!
//! An in-process LRU with per-entry TTL (~100 entries, 5 minutes) fronted by
//! a cross-process key-value tier (30 minutes). Writes invalidate by prefix:
//! any customer write clears `customer:*`; a ledger write clears that
//! customer's balance key. LLM responses cache under a SHA-256 key with a
//! per-intent policy; fallback strings are never cached.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dukaan_voice_core::Intent;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::StoreError;

/// Cross-process tier.
#[async_trait]
pub trait KvTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn del_prefix(&self, prefix: &str) -> Result<(), StoreError>;
}

/// No-op tier for single-process deployments.
pub struct NullKv;

#[async_trait]
impl KvTier for NullKv {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Ok(())
    }

    async fn del_prefix(&self, _prefix: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Redis-backed tier.
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KvTier for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let _: () = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }
}

/// The two-tier cache itself.
pub struct TieredCache {
    local: Mutex<LruCache<String, (Instant, String)>>,
    local_ttl: Duration,
    remote: Box<dyn KvTier>,
    remote_ttl: Duration,
}

impl TieredCache {
    pub fn new(
        capacity: usize,
        local_ttl: Duration,
        remote: Box<dyn KvTier>,
        remote_ttl: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            local: Mutex::new(LruCache::new(capacity)),
            local_ttl,
            remote,
            remote_ttl,
        }
    }

    /// Local tier only, for deployments without a key-value service.
    pub fn local_only(capacity: usize, local_ttl: Duration) -> Self {
        Self::new(capacity, local_ttl, Box::new(NullKv), Duration::from_secs(1800))
    }

    /// Read through both tiers; a remote hit repopulates the local tier.
    pub async fn get(&self, key: &str) -> Option<String> {
        {
            let mut local = self.local.lock();
            if let Some((stored_at, value)) = local.get(key) {
                if stored_at.elapsed() <= self.local_ttl {
                    return Some(value.clone());
                }
                local.pop(key);
            }
        }

        match self.remote.get(key).await {
            Ok(Some(value)) => {
                self.local
                    .lock()
                    .put(key.to_string(), (Instant::now(), value.clone()));
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(key, error = %e, "Remote cache read failed");
                None
            }
        }
    }

    /// Write to both tiers. Remote failures degrade to local-only.
    pub async fn put(&self, key: &str, value: &str) {
        self.local
            .lock()
            .put(key.to_string(), (Instant::now(), value.to_string()));
        if let Err(e) = self.remote.set_ex(key, value, self.remote_ttl).await {
            tracing::debug!(key, error = %e, "Remote cache write failed");
        }
    }

    /// Override the TTL on the remote tier (LLM cache policies).
    pub async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        self.local
            .lock()
            .put(key.to_string(), (Instant::now(), value.to_string()));
        if let Err(e) = self.remote.set_ex(key, value, ttl).await {
            tracing::debug!(key, error = %e, "Remote cache write failed");
        }
    }

    /// Drop every key under a prefix from both tiers.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        {
            let mut local = self.local.lock();
            let stale: Vec<String> = local
                .iter()
                .map(|(k, _)| k.clone())
                .filter(|k| k.starts_with(prefix))
                .collect();
            for key in stale {
                local.pop(&key);
            }
        }
        if let Err(e) = self.remote.del_prefix(prefix).await {
            tracing::debug!(prefix, error = %e, "Remote cache invalidation failed");
        }
    }
}

/// Scope of one intent's LLM-response cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Keyed into the conversation: context hash is part of the key.
    Conversation,
    /// Shared across sessions.
    Global,
}

/// Per-intent LLM-response cache policy.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub scope: CacheScope,
}

impl CachePolicy {
    /// Policy for one intent; `None` means never cache.
    pub fn for_intent(intent: Intent) -> Option<Self> {
        match intent {
            // stable read-only answers can be shared
            Intent::CheckStock | Intent::ListCustomerBalances | Intent::TotalPendingAmount => {
                Some(Self {
                    ttl: Duration::from_secs(120),
                    scope: CacheScope::Global,
                })
            }
            // conversational phrasings depend on the dialogue
            Intent::CheckBalance | Intent::GetCustomerInfo | Intent::DailySummary => Some(Self {
                ttl: Duration::from_secs(60),
                scope: CacheScope::Conversation,
            }),
            // writes must never serve a stale phrasing of a different result
            _ => None,
        }
    }
}

/// SHA-256 cache key over (intent, execution result, normalized message,
/// and — for conversation scope — the context hash).
pub fn llm_cache_key(
    intent: Intent,
    result_digest: &str,
    normalized: &str,
    context_hash: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(intent.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(result_digest.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(normalized.as_bytes());
    if let Some(context) = context_hash {
        hasher.update(b"\x1f");
        hasher.update(context.as_bytes());
    }
    format!("llm:{}:{:x}", intent.as_str(), hasher.finalize())
}

/// Hash of the formatted conversation context, for conversation-scoped keys.
pub fn context_hash(context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_tier_round_trip() {
        let cache = TieredCache::local_only(10, Duration::from_secs(60));
        cache.put("customer:q:rahul", "[]").await;
        assert_eq!(cache.get("customer:q:rahul").await, Some("[]".to_string()));
    }

    #[tokio::test]
    async fn local_ttl_expires() {
        let cache = TieredCache::local_only(10, Duration::from_millis(0));
        cache.put("k", "v").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn prefix_invalidation() {
        let cache = TieredCache::local_only(10, Duration::from_secs(60));
        cache.put("customer:q:rahul", "a").await;
        cache.put("customer:list", "b").await;
        cache.put("llm:CHECK_STOCK:abc", "c").await;

        cache.invalidate_prefix("customer:").await;

        assert_eq!(cache.get("customer:q:rahul").await, None);
        assert_eq!(cache.get("customer:list").await, None);
        assert_eq!(cache.get("llm:CHECK_STOCK:abc").await, Some("c".to_string()));
    }

    #[test]
    fn cache_keys_separate_by_context() {
        let a = llm_cache_key(Intent::CheckBalance, "r", "m", Some("ctx1"));
        let b = llm_cache_key(Intent::CheckBalance, "r", "m", Some("ctx2"));
        let c = llm_cache_key(Intent::CheckBalance, "r", "m", Some("ctx1"));
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn write_intents_are_never_cached() {
        assert!(CachePolicy::for_intent(Intent::AddCredit).is_none());
        assert!(CachePolicy::for_intent(Intent::CreateInvoice).is_none());
        assert!(CachePolicy::for_intent(Intent::CheckStock).is_some());
    }
}
