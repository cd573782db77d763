//! Redelivery detection for webhook items.
//!
//! Keys are content-addressed: the SHA-256 of the item's canonical JSON (object
//! keys sorted, no insignificant whitespace). A claim is taken before an item is
//! processed and released again if processing fails, so the source can redeliver.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Returns `true` when the key was not held (or its claim had expired).
    async fn claim(&self, key: &str, now: DateTime<Utc>) -> bool;

    async fn release(&self, key: &str);

    /// Drops claims older than the TTL, returning how many were removed.
    async fn evict_expired(&self, now: DateTime<Utc>) -> usize;

    /// Drops the oldest claims until the store is at or under its key limit.
    async fn enforce_capacity(&self) -> usize;
}

pub fn idempotency_key(item: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(item).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            Value::Object(
                entries.into_iter().map(|(key, value)| (key.clone(), canonicalize(value))).collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    ttl: Duration,
    max_keys: usize,
    claims: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl_secs: u64, max_keys: usize) -> Self {
        let ttl = Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64);
        Self { ttl, max_keys, claims: Mutex::new(HashMap::new()) }
    }

    pub async fn len(&self) -> usize {
        self.claims.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.claims.lock().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.claims.lock().await.contains_key(key)
    }

    fn is_expired(&self, claimed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - claimed_at >= self.ttl
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut claims = self.claims.lock().await;
        match claims.get(key) {
            Some(claimed_at) if !self.is_expired(*claimed_at, now) => false,
            _ => {
                claims.insert(key.to_string(), now);
                true
            }
        }
    }

    async fn release(&self, key: &str) {
        self.claims.lock().await.remove(key);
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut claims = self.claims.lock().await;
        let before = claims.len();
        claims.retain(|_, claimed_at| !self.is_expired(*claimed_at, now));
        before - claims.len()
    }

    async fn enforce_capacity(&self) -> usize {
        let mut claims = self.claims.lock().await;
        if claims.len() <= self.max_keys {
            return 0;
        }

        let overflow = claims.len() - self.max_keys;
        let mut by_age: Vec<(String, DateTime<Utc>)> =
            claims.iter().map(|(key, claimed_at)| (key.clone(), *claimed_at)).collect();
        by_age.sort_by(|left, right| left.1.cmp(&right.1).then_with(|| left.0.cmp(&right.0)));
        for (key, _) in by_age.into_iter().take(overflow) {
            claims.remove(&key);
        }
        overflow
    }
}
