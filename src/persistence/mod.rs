use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::SignalCandidate;

const SYMBOLS_KEY: &str = "signals:symbols";
const DELIVERY_KEY: &str = "signals:delivery";

/// Durable history of emitted signals
///
/// Failures are reported, never fatal: callers log them as degraded
/// persistence and carry on with in-memory state.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn save_signal(&self, signal: &SignalCandidate) -> Result<(), StoreError>;

    /// Signals for `symbol` generated within the trailing `window`, oldest first
    async fn load_recent_signals(
        &self,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<SignalCandidate>, StoreError>;

    async fn mark_delivery(&self, id: Uuid, delivered: bool) -> Result<(), StoreError>;

    /// Remove signals older than `keep`, returning how many were removed
    async fn cleanup_older_than(&self, keep: Duration) -> Result<usize, StoreError>;

    fn name(&self) -> &'static str;
}

/// Redis signal store
///
/// Signals live in sorted sets `signals:{symbol}` scored by generation
/// timestamp; delivery outcomes in the hash `signals:delivery`.
#[derive(Clone)]
pub struct RedisSignalStore {
    conn: ConnectionManager,
}

impl RedisSignalStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> crate::Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(
            std::time::Duration::from_secs(5),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(symbol: &str) -> String {
        format!("signals:{}", symbol)
    }

    #[cfg(test)]
    async fn delivery_status(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(DELIVERY_KEY, id.to_string()).await?)
    }
}

#[async_trait]
impl SignalStore for RedisSignalStore {
    async fn save_signal(&self, signal: &SignalCandidate) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(signal)?;
        let score = signal.generated_at.timestamp() as f64;

        conn.zadd::<_, _, _, ()>(Self::key(&signal.symbol), value, score)
            .await?;
        conn.sadd::<_, _, ()>(SYMBOLS_KEY, &signal.symbol).await?;

        tracing::debug!(id = %signal.id, kind = %signal.kind, "Saved signal to Redis");
        Ok(())
    }

    async fn load_recent_signals(
        &self,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<SignalCandidate>, StoreError> {
        let mut conn = self.conn.clone();
        let min_score = (Utc::now() - window).timestamp() as f64;

        let results: Vec<String> = conn
            .zrangebyscore(Self::key(symbol), min_score, "+inf")
            .await?;

        let signals = results
            .iter()
            .map(|json| serde_json::from_str::<SignalCandidate>(json))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("Loaded {} recent signals for {} from Redis", signals.len(), symbol);
        Ok(signals)
    }

    async fn mark_delivery(&self, id: Uuid, delivered: bool) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let status = if delivered { "delivered" } else { "failed" };
        conn.hset::<_, _, _, ()>(DELIVERY_KEY, id.to_string(), status)
            .await?;
        Ok(())
    }

    async fn cleanup_older_than(&self, keep: Duration) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let max_score = (Utc::now() - keep).timestamp() as f64;
        let symbols: Vec<String> = conn.smembers(SYMBOLS_KEY).await?;

        let mut removed = 0;
        for symbol in symbols {
            let key = Self::key(&symbol);
            let expired: Vec<String> = conn.zrangebyscore(&key, "-inf", max_score).await?;
            if expired.is_empty() {
                continue;
            }

            let n: usize = conn.zrembyscore(&key, "-inf", max_score).await?;
            removed += n;

            let ids: Vec<String> = expired
                .iter()
                .filter_map(|json| serde_json::from_str::<SignalCandidate>(json).ok())
                .map(|s| s.id.to_string())
                .collect();
            if !ids.is_empty() {
                conn.hdel::<_, _, ()>(DELIVERY_KEY, ids).await?;
            }
        }

        if removed > 0 {
            tracing::debug!("Cleaned up {} old signals from Redis", removed);
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Process-local signal store, used when no backend is reachable
#[derive(Default)]
pub struct MemorySignalStore {
    signals: Mutex<Vec<SignalCandidate>>,
    delivery: Mutex<HashMap<Uuid, bool>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.signals.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn delivery_status(&self, id: Uuid) -> Option<bool> {
        self.delivery.lock().ok().and_then(|d| d.get(&id).copied())
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }

    fn recent_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SignalCandidate>, StoreError> {
        let signals = self.signals.lock().map_err(Self::poisoned)?;
        let mut recent: Vec<SignalCandidate> = signals
            .iter()
            .filter(|s| s.symbol == symbol && s.generated_at >= cutoff)
            .cloned()
            .collect();
        recent.sort_by_key(|s| s.generated_at);
        Ok(recent)
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn save_signal(&self, signal: &SignalCandidate) -> Result<(), StoreError> {
        self.signals
            .lock()
            .map_err(Self::poisoned)?
            .push(signal.clone());
        Ok(())
    }

    async fn load_recent_signals(
        &self,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<SignalCandidate>, StoreError> {
        self.recent_since(symbol, Utc::now() - window)
    }

    async fn mark_delivery(&self, id: Uuid, delivered: bool) -> Result<(), StoreError> {
        self.delivery
            .lock()
            .map_err(Self::poisoned)?
            .insert(id, delivered);
        Ok(())
    }

    async fn cleanup_older_than(&self, keep: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - keep;
        let mut signals = self.signals.lock().map_err(Self::poisoned)?;
        let before = signals.len();
        let mut expired = Vec::new();
        signals.retain(|s| {
            let keep = s.generated_at >= cutoff;
            if !keep {
                expired.push(s.id);
            }
            keep
        });

        let mut delivery = self.delivery.lock().map_err(Self::poisoned)?;
        for id in &expired {
            delivery.remove(id);
        }
        Ok(expired.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
